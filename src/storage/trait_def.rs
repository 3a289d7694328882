use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::event::StoredEvent;
use crate::models::import::{ImportSession, ImportStatus, Site};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, indexes)
    async fn init(&self) -> Result<()>;

    /// Create a site owned by an organization; the token grants
    /// administrative access to the site
    async fn create_site(&self, organization: &str, name: &str, api_token: &str) -> Result<Site>;

    /// Look up a site by id
    async fn get_site(&self, site_id: i64) -> Result<Option<Site>>;

    /// Create an import session in `pending` state
    async fn create_import_session(&self, import_id: &str, site_id: i64) -> Result<ImportSession>;

    /// Look up an import session by id
    async fn get_import_session(&self, import_id: &str) -> Result<Option<ImportSession>>;

    /// Move a session to a non-terminal status (pending -> processing)
    async fn set_session_status(&self, import_id: &str, status: ImportStatus)
        -> StorageResult<()>;

    /// Persist the detected source platform; immutable once set
    async fn set_session_platform(&self, import_id: &str, platform: &str) -> Result<()>;

    /// Add an accepted batch's size to the session's imported counter
    async fn add_imported_events(&self, import_id: &str, count: i64) -> StorageResult<()>;

    /// Move a session to a terminal status with an optional message
    async fn finalize_session(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> StorageResult<()>;

    /// Bulk-insert a batch of events. All rows are written in one
    /// transaction: the whole batch lands or none of it does. Returns
    /// the number of rows inserted.
    async fn insert_events(&self, events: &[StoredEvent]) -> Result<u64>;

    /// Events per calendar month (`"yyyy-MM"` label) across all of an
    /// organization's sites, for timestamps at or after `since`
    async fn monthly_event_counts(
        &self,
        organization: &str,
        since: i64,
    ) -> Result<Vec<(String, i64)>>;
}
