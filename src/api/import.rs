//! Import session endpoints: start, batch ingestion, status polling
//!
//! The batch handler drives the per-session state machine
//! `pending -> processing -> {completed, failed}`. All protocol checks
//! (shape, authorization, session state, platform detection) happen
//! before any state is mutated, so a rejected request leaves the
//! session exactly as it found it.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::handlers::{api_error, api_error_with_message, ApiError, AppState};
use crate::import::date_filter::TIMESTAMP_FORMAT;
use crate::models::event::StoredEvent;
use crate::models::import::{
    AllowedDateRange, BatchImportRequest, BatchImportResponse, ImportStatus, ImportStatusResponse,
    Site, StartImportResponse,
};
use crate::platforms::{self, PlatformImporter};
use crate::quota::{MonthKey, QuotaTracker};

/// Resolve the site and check the caller's bearer token against it.
async fn authorize_site(
    state: &AppState,
    site_id: i64,
    headers: &HeaderMap,
) -> Result<Site, ApiError> {
    let site = state
        .storage
        .get_site(site_id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load site: {}", e),
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Site not found"))?;

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == site.api_token => Ok(site),
        _ => Err(api_error(
            StatusCode::FORBIDDEN,
            "Administrative access to this site is required",
        )),
    }
}

/// Seed a quota tracker from one consistent read of the store. The
/// tracker is request-local; its decrements never outlive the request.
async fn load_quota_tracker(
    state: &AppState,
    organization: &str,
    today: NaiveDate,
) -> Result<QuotaTracker, ApiError> {
    let window_months = state.config.import.quota_window_months;

    let mut oldest = MonthKey::from_date(today);
    for _ in 1..window_months.max(1) {
        oldest = oldest.prev();
    }
    let since = oldest
        .first_day()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp();

    let used = state
        .storage
        .monthly_event_counts(organization, since)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load quota usage: {}", e),
            )
        })?;

    Ok(QuotaTracker::new(
        today,
        window_months,
        state.config.import.monthly_event_limit,
        &used,
    ))
}

/// Create an import session and tell the client which date range the
/// organization's quota can accept, so it can skip rows up front.
pub async fn start_import(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i64>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<StartImportResponse>), ApiError> {
    let site = authorize_site(&state, site_id, &headers).await?;

    let today = Utc::now().date_naive();
    let tracker = load_quota_tracker(&state, &site.organization, today).await?;
    let earliest = tracker.earliest_allowed().unwrap_or(today);

    let import_id = Uuid::new_v4().to_string();
    state
        .storage
        .create_import_session(&import_id, site.id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create import session: {}", e),
            )
        })?;

    info!(site_id, %import_id, "import session created");

    Ok((
        StatusCode::CREATED,
        Json(StartImportResponse {
            import_id,
            allowed_date_range: AllowedDateRange {
                earliest_allowed_date: earliest.format("%Y-%m-%d").to_string(),
                latest_allowed_date: today.format("%Y-%m-%d").to_string(),
            },
        }),
    ))
}

/// Ingest one batch for a session.
pub async fn batch_import_events(
    State(state): State<Arc<AppState>>,
    Path((site_id, import_id)): Path<(i64, String)>,
    headers: HeaderMap,
    Json(payload): Json<BatchImportRequest>,
) -> Result<Json<BatchImportResponse>, ApiError> {
    // Request shape first: nothing is mutated on rejection
    let max_batch = state.config.import.max_batch_size;
    if payload.events.len() > max_batch {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Batch exceeds the maximum of {} events", max_batch),
        ));
    }
    if payload.events.is_empty() && !payload.is_last_batch {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Batch must contain at least one event",
        ));
    }

    let site = authorize_site(&state, site_id, &headers).await?;

    let session = state
        .storage
        .get_import_session(&import_id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load import session: {}", e),
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Import session not found"))?;

    if session.site_id != site.id {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Import session not found for this site",
        ));
    }

    let status = session.status();
    if status.is_terminal() {
        return Err(api_error_with_message(
            StatusCode::BAD_REQUEST,
            "Import session is already finalized",
            format!("Session is {}; no further batches are accepted", status.as_str()),
        ));
    }

    // Resolve the platform before mutating anything. An unrecognized
    // shape can only happen on the very first batch of a session.
    let importer: Option<&'static dyn PlatformImporter> = match session.platform.as_deref() {
        Some(name) => Some(platforms::importer_for(name).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Unknown source platform '{}' on session", name),
            )
        })?),
        None => match payload.events.first() {
            Some(first) => Some(platforms::detect_platform(first).ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "Could not detect a supported source platform from the first event",
                )
            })?),
            // Empty terminating batch before any data batch
            None => None,
        },
    };

    if status == ImportStatus::Pending {
        state
            .storage
            .set_session_status(&import_id, ImportStatus::Processing)
            .await
            .map_err(|e| {
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to update import session: {}", e),
                )
            })?;
    }

    if session.platform.is_none() {
        if let Some(importer) = importer {
            state
                .storage
                .set_session_platform(&import_id, importer.name())
                .await
                .map_err(|e| {
                    api_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to update import session: {}", e),
                    )
                })?;
            info!(%import_id, platform = importer.name(), "detected source platform");
        }
    }

    // Partition into admitted vs. quota-skipped. The tracker consumes
    // capacity as it admits, so exhaustion partway through the batch
    // applies to the rest of it.
    let today = Utc::now().date_naive();
    let mut tracker = load_quota_tracker(&state, &site.organization, today).await?;

    let mut admitted: Vec<StoredEvent> = Vec::new();
    let mut quota_skipped: u64 = 0;
    let mut dropped: u64 = 0;

    if let Some(importer) = importer {
        for raw in &payload.events {
            let Some(canonical) = importer.transform(raw) else {
                dropped += 1;
                continue;
            };
            let Ok(ts) = NaiveDateTime::parse_from_str(&canonical.created_at, TIMESTAMP_FORMAT)
            else {
                dropped += 1;
                continue;
            };
            if tracker.can_import(&ts) {
                let timestamp = ts.and_utc().timestamp();
                admitted.push(StoredEvent::from_canonical(site.id, timestamp, canonical));
            } else {
                quota_skipped += 1;
            }
        }
    }

    if dropped > 0 {
        warn!(%import_id, dropped, "dropped events without a parseable timestamp");
    }

    if admitted.is_empty() {
        let quota_exceeded = quota_skipped > 0;
        let message = quota_exceeded.then(|| tracker.summary().message());

        if payload.is_last_batch {
            let final_message = message
                .clone()
                .unwrap_or_else(|| "Import completed".to_string());
            state
                .storage
                .finalize_session(&import_id, ImportStatus::Completed, Some(&final_message))
                .await
                .map_err(|e| {
                    api_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to finalize import session: {}", e),
                    )
                })?;
            info!(%import_id, quota_exceeded, "import completed with no events in final batch");
        }

        return Ok(Json(BatchImportResponse {
            success: true,
            imported_count: 0,
            quota_exceeded,
            message,
        }));
    }

    // One atomic insert per batch: it either fully lands or the whole
    // request fails and the session is closed as failed. No retries --
    // a retried batch would be double-inserted.
    let inserted = match state.storage.insert_events(&admitted).await {
        Ok(n) => n,
        Err(e) => {
            let detail = e.to_string();
            error!(%import_id, error = %detail, "event insert failed, failing session");
            if let Err(finalize_err) = state
                .storage
                .finalize_session(&import_id, ImportStatus::Failed, Some(&detail))
                .await
            {
                error!(%import_id, error = %finalize_err, "failed to mark session failed");
            }
            return Err(api_error_with_message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store events",
                detail,
            ));
        }
    };

    state
        .storage
        .add_imported_events(&import_id, inserted as i64)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update import progress: {}", e),
            )
        })?;

    let message = if payload.is_last_batch {
        let text = if quota_skipped > 0 {
            format!(
                "Import completed; {} events were skipped because {}",
                quota_skipped,
                tracker.summary().message()
            )
        } else {
            "Import completed".to_string()
        };
        state
            .storage
            .finalize_session(&import_id, ImportStatus::Completed, Some(&text))
            .await
            .map_err(|e| {
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to finalize import session: {}", e),
                )
            })?;
        info!(%import_id, inserted, "import completed");
        Some(text)
    } else {
        (quota_skipped > 0).then(|| tracker.summary().message())
    };

    // Events were admitted, so capacity remains for at least their
    // months. `quotaExceeded` is the client's soft-stop signal and is
    // only raised when a batch admits nothing; a straddling batch gets
    // the skip note in `message` instead.
    Ok(Json(BatchImportResponse {
        success: true,
        imported_count: inserted as i64,
        quota_exceeded: false,
        message,
    }))
}

/// Session snapshot for the polling UI.
pub async fn get_import_status(
    State(state): State<Arc<AppState>>,
    Path((site_id, import_id)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Json<ImportStatusResponse>, ApiError> {
    let site = authorize_site(&state, site_id, &headers).await?;

    let session = state
        .storage
        .get_import_session(&import_id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load import session: {}", e),
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Import session not found"))?;

    if session.site_id != site.id {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Import session not found for this site",
        ));
    }

    Ok(Json(ImportStatusResponse {
        status: session.status(),
        import_id: session.import_id,
        platform: session.platform,
        imported_events: session.imported_events,
        error_message: session.error_message,
    }))
}
