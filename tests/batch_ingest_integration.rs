//! Batch ingestion API integration tests
//!
//! Exercises the import session lifecycle end-to-end against the axum
//! router with in-memory SQLite storage: session creation, platform
//! detection, quota admission, finalization, and the terminal-state
//! rejection rules.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use marten::api;
use marten::config::{Config, DatabaseBackend, DatabaseConfig, ImportConfig, ServerConfig};
use marten::models::event::StoredEvent;
use marten::models::import::{ImportSession, ImportStatus, Site};
use marten::quota::MonthKey;
use marten::storage::{SqliteStorage, Storage, StorageResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const TEST_TOKEN: &str = "test-token";

/// Helper to create test storage
///
/// A single connection keeps every query on the same in-memory
/// database.
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create test config
fn create_test_config(monthly_event_limit: i64, max_batch_size: usize) -> Arc<Config> {
    Arc::new(Config {
        database: DatabaseConfig {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        api_server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        import: ImportConfig {
            monthly_event_limit,
            quota_window_months: 12,
            max_batch_size,
        },
    })
}

async fn create_test_app(monthly_event_limit: i64) -> (Router, Arc<dyn Storage>, Site) {
    let storage = create_test_storage().await;
    let site = storage
        .create_site("acme", "Test Site", TEST_TOKEN)
        .await
        .unwrap();
    let app = api::create_api_router(
        Arc::clone(&storage),
        create_test_config(monthly_event_limit, 10_000),
    );
    (app, storage, site)
}

async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start_import(app: &Router, site_id: i64) -> String {
    let (status, body) = request_json(
        app,
        "POST",
        &format!("/api/import/{}", site_id),
        Some(TEST_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "start import failed: {body}");
    body["importId"].as_str().unwrap().to_string()
}

/// An event timestamped at 10:00 today, inside the quota window.
fn umami_event() -> Value {
    umami_event_at(&format!("{} 10:00:00", Utc::now().date_naive().format("%Y-%m-%d")))
}

fn umami_event_at(created_at: &str) -> Value {
    json!({
        "session_id": "sess-1",
        "url_path": "/docs",
        "created_at": created_at,
        "hostname": "example.com",
        "browser": "firefox",
        "country": "US",
    })
}

fn batch_uri(site_id: i64, import_id: &str) -> String {
    format!("/api/batch-import-events/{}/{}", site_id, import_id)
}

async fn session_status(app: &Router, site_id: i64, import_id: &str) -> Value {
    let (status, body) = request_json(
        app,
        "GET",
        &format!("/api/import/{}/{}", site_id, import_id),
        Some(TEST_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_start_import_reports_quota_window() {
    let (app, _storage, site) = create_test_app(100).await;

    let (status, body) = request_json(
        &app,
        "POST",
        &format!("/api/import/{}", site.id),
        Some(TEST_TOKEN),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(!body["importId"].as_str().unwrap().is_empty());

    // Earliest allowed date is the first day of the oldest tracked
    // month: 11 months before the current one
    let mut oldest = MonthKey::from_date(Utc::now().date_naive());
    for _ in 1..12 {
        oldest = oldest.prev();
    }
    let expected = oldest.first_day().format("%Y-%m-%d").to_string();
    assert_eq!(
        body["allowedDateRange"]["earliestAllowedDate"].as_str().unwrap(),
        expected
    );
    assert_eq!(
        body["allowedDateRange"]["latestAllowedDate"].as_str().unwrap(),
        Utc::now().date_naive().format("%Y-%m-%d").to_string()
    );
}

#[tokio::test]
async fn test_full_import_lifecycle() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    // Fresh session is pending with no platform
    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "pending");
    assert!(snapshot.get("platform").is_none());

    // First batch: platform detected, session moves to processing
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event(), umami_event(), umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["importedCount"], 3);
    assert_eq!(body["quotaExceeded"], false);

    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "processing");
    assert_eq!(snapshot["platform"], "umami");
    assert_eq!(snapshot["importedEvents"], 3);

    // Final batch completes the session
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event(), umami_event()], "isLastBatch": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 2);

    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["importedEvents"], 5);
}

#[tokio::test]
async fn test_empty_last_batch_completes_session() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [], "isLastBatch": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 0);
    assert_eq!(body["quotaExceeded"], false);

    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["importedEvents"], 0);
}

#[tokio::test]
async fn test_empty_batch_requires_last_flag() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_terminal_session_rejects_further_batches() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()], "isLastBatch": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("completed"));

    // Counters and status are untouched by the rejected batch
    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["importedEvents"], 1);
}

#[tokio::test]
async fn test_unknown_platform_rejects_first_batch() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [{"page": "/", "ts": 1700000000}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Session is untouched: still pending, no platform persisted
    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "pending");
    assert!(snapshot.get("platform").is_none());
}

#[tokio::test]
async fn test_quota_partitions_batch() {
    // Two events fit this month's quota, the rest are skipped. Events
    // were still admitted, so the exhaustion flag stays down and the
    // skips are reported in the message only.
    let (app, _storage, site) = create_test_app(2).await;
    let import_id = start_import(&app, site.id).await;

    let events: Vec<Value> = (0..5).map(|_| umami_event()).collect();
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": events, "isLastBatch": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 2);
    assert_eq!(body["quotaExceeded"], false);
    assert!(body["message"].as_str().unwrap().contains("skipped"));

    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["importedEvents"], 2);
}

#[tokio::test]
async fn test_partial_admission_keeps_import_alive() {
    // A batch that straddles an at-capacity month must not tell the
    // client to stop: later batches can still carry events for months
    // with room.
    let (app, _storage, site) = create_test_app(1).await;
    let import_id = start_import(&app, site.id).await;

    // Two current-month events against a capacity of one: one lands,
    // one is skipped, no stop signal
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event(), umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 1);
    assert_eq!(body["quotaExceeded"], false);
    assert!(body["message"].as_str().unwrap().contains("at capacity"));

    // The previous month still has capacity and accepts its event
    let prev = MonthKey::from_date(Utc::now().date_naive()).prev();
    let prev_event =
        umami_event_at(&format!("{} 10:00:00", prev.first_day().format("%Y-%m-%d")));
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [prev_event], "isLastBatch": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 1);
    assert_eq!(body["quotaExceeded"], false);

    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["importedEvents"], 2);
}

#[tokio::test]
async fn test_fully_exhausted_quota_soft_stops() {
    let (app, _storage, site) = create_test_app(1).await;
    let first_import = start_import(&app, site.id).await;

    // Consume the month's quota in a first import
    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &first_import),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()], "isLastBatch": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A later import finds no capacity left: success, zero imported,
    // quotaExceeded set
    let second_import = start_import(&app, site.id).await;
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &second_import),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 0);
    assert_eq!(body["quotaExceeded"], true);
}

#[tokio::test]
async fn test_events_outside_window_are_quota_skipped() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event_at("2015-06-01 00:00:00")]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 0);
    assert_eq!(body["quotaExceeded"], true);
}

#[tokio::test]
async fn test_events_without_timestamp_are_dropped() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let mut missing = umami_event();
    missing["created_at"] = json!("");

    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event(), missing]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["importedCount"], 1);
    assert_eq!(body["quotaExceeded"], false);
}

#[tokio::test]
async fn test_oversized_batch_rejected() {
    let storage = create_test_storage().await;
    let site = storage
        .create_site("acme", "Test Site", TEST_TOKEN)
        .await
        .unwrap();
    // Tight server-side cap for the test
    let app = api::create_api_router(Arc::clone(&storage), create_test_config(100, 10));
    let import_id = start_import(&app, site.id).await;

    let events: Vec<Value> = (0..11).map(|_| umami_event()).collect();
    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": events})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("maximum"));

    // Nothing was mutated
    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "pending");
}

#[tokio::test]
async fn test_authorization_required() {
    let (app, _storage, site) = create_test_app(100).await;
    let import_id = start_import(&app, site.id).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        None,
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some("wrong-token"),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(999, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_session_and_wrong_site_rejected() {
    let (app, storage, site) = create_test_app(100).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, "no-such-import"),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A session belonging to another site is not visible here
    let other = storage
        .create_site("acme", "Other Site", "other-token")
        .await
        .unwrap();
    let import_id = start_import(&app, site.id).await;

    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(other.id, &import_id),
        Some("other-token"),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Delegates everything to real SQLite storage but fails every event
/// insert, to exercise the fail-fast path.
struct FailingStorage {
    inner: Arc<dyn Storage>,
}

#[async_trait]
impl Storage for FailingStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_site(&self, organization: &str, name: &str, api_token: &str) -> Result<Site> {
        self.inner.create_site(organization, name, api_token).await
    }

    async fn get_site(&self, site_id: i64) -> Result<Option<Site>> {
        self.inner.get_site(site_id).await
    }

    async fn create_import_session(&self, import_id: &str, site_id: i64) -> Result<ImportSession> {
        self.inner.create_import_session(import_id, site_id).await
    }

    async fn get_import_session(&self, import_id: &str) -> Result<Option<ImportSession>> {
        self.inner.get_import_session(import_id).await
    }

    async fn set_session_status(
        &self,
        import_id: &str,
        status: ImportStatus,
    ) -> StorageResult<()> {
        self.inner.set_session_status(import_id, status).await
    }

    async fn set_session_platform(&self, import_id: &str, platform: &str) -> Result<()> {
        self.inner.set_session_platform(import_id, platform).await
    }

    async fn add_imported_events(&self, import_id: &str, count: i64) -> StorageResult<()> {
        self.inner.add_imported_events(import_id, count).await
    }

    async fn finalize_session(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> StorageResult<()> {
        self.inner.finalize_session(import_id, status, message).await
    }

    async fn insert_events(&self, _events: &[StoredEvent]) -> Result<u64> {
        Err(anyhow::anyhow!("simulated storage outage"))
    }

    async fn monthly_event_counts(
        &self,
        organization: &str,
        since: i64,
    ) -> Result<Vec<(String, i64)>> {
        self.inner.monthly_event_counts(organization, since).await
    }
}

#[tokio::test]
async fn test_insert_failure_fails_session_permanently() {
    let inner = create_test_storage().await;
    let site = inner
        .create_site("acme", "Test Site", TEST_TOKEN)
        .await
        .unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FailingStorage { inner });
    let app = api::create_api_router(Arc::clone(&storage), create_test_config(100, 10_000));
    let import_id = start_import(&app, site.id).await;

    let (status, body) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].as_str().unwrap().contains("storage outage"));

    // Session failed with the error text and no counted events
    let snapshot = session_status(&app, site.id, &import_id).await;
    assert_eq!(snapshot["status"], "failed");
    assert_eq!(snapshot["importedEvents"], 0);
    assert!(snapshot["errorMessage"]
        .as_str()
        .unwrap()
        .contains("storage outage"));

    // Further batches are rejected outright
    let (status, _) = request_json(
        &app,
        "POST",
        &batch_uri(site.id, &import_id),
        Some(TEST_TOKEN),
        Some(json!({"events": [umami_event()]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
