//! Progress reporting surface consumed by the UI/CLI

use serde::Serialize;

/// Client-side phase of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    Idle,
    Parsing,
    Uploading,
    Completed,
    Failed,
}

/// Snapshot delivered to the progress callback on every state change
/// and after every batch result.
#[derive(Debug, Clone, Serialize)]
pub struct ImportProgress {
    pub status: ImportPhase,
    /// Rows accepted by the parser so far
    pub parsed_rows: u64,
    /// Rows rejected by the mapper or the date filter
    pub skipped_rows: u64,
    /// Events the server has confirmed imported
    pub imported_events: u64,
    /// Malformed CSV rows
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ProgressCallback = Box<dyn Fn(ImportProgress) + Send + Sync>;
