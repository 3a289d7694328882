//! Import session and site models, plus the import wire DTOs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::event::RawEvent;

/// Lifecycle status of an import session.
///
/// Transitions are monotonic: `pending -> processing -> {completed, failed}`.
/// Terminal states reject all further batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ImportStatus::Pending),
            "processing" => Some(ImportStatus::Processing),
            "completed" => Some(ImportStatus::Completed),
            "failed" => Some(ImportStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }
}

/// Durable record of one import attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImportSession {
    pub import_id: String,
    pub site_id: i64,
    /// Stored as text; see [`ImportSession::status`]
    pub status: String,
    /// Source platform tag, null until the first batch is received
    pub platform: Option<String>,
    pub imported_events: i64,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ImportSession {
    /// Typed view of the stored status column.
    ///
    /// An unrecognized value is treated as `failed` so a corrupted row
    /// can never be mistaken for an active session.
    pub fn status(&self) -> ImportStatus {
        ImportStatus::parse(&self.status).unwrap_or(ImportStatus::Failed)
    }
}

/// A site that events are imported into. The `api_token` grants
/// administrative access; the `organization` is the quota scope.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Site {
    pub id: i64,
    pub organization: String,
    pub name: String,
    pub api_token: String,
    pub created_at: i64,
}

/// `POST /api/batch-import-events/{site_id}/{import_id}` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchImportRequest {
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub is_last_batch: bool,
}

/// Success body for a batch upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchImportResponse {
    pub success: bool,
    pub imported_count: i64,
    #[serde(default)]
    pub quota_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `POST /api/import/{site_id}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportResponse {
    pub import_id: String,
    pub allowed_date_range: AllowedDateRange,
}

/// Date window (`yyyy-MM-dd`, day granularity) the server's quota
/// permits. Supplied once per import so the client can skip rows that
/// are guaranteed to be rejected; the server re-validates regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedDateRange {
    pub earliest_allowed_date: String,
    pub latest_allowed_date: String,
}

/// `GET /api/import/{site_id}/{import_id}` response body for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatusResponse {
    pub import_id: String,
    pub status: ImportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub imported_events: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
