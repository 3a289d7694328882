use crate::models::event::StoredEvent;
use crate::models::import::{ImportSession, ImportStatus, Site};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Rows per INSERT statement, keeping bind counts well under SQLite's
/// parameter limit. All chunks of one batch share one transaction.
const INSERT_CHUNK_ROWS: usize = 500;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_unix() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization TEXT NOT NULL,
                name TEXT NOT NULL,
                api_token TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_sessions (
                import_id TEXT PRIMARY KEY,
                site_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                platform TEXT,
                imported_events INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_site ON import_sessions(site_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                session_id TEXT NOT NULL DEFAULT '',
                hostname TEXT NOT NULL DEFAULT '',
                pathname TEXT NOT NULL DEFAULT '',
                query TEXT NOT NULL DEFAULT '',
                page_title TEXT NOT NULL DEFAULT '',
                referrer TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                operating_system TEXT NOT NULL DEFAULT '',
                device_type TEXT NOT NULL DEFAULT '',
                screen_resolution TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                utm_source TEXT NOT NULL DEFAULT '',
                utm_medium TEXT NOT NULL DEFAULT '',
                utm_campaign TEXT NOT NULL DEFAULT '',
                utm_content TEXT NOT NULL DEFAULT '',
                utm_term TEXT NOT NULL DEFAULT '',
                event_type TEXT NOT NULL DEFAULT '',
                event_name TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_site_time ON events(site_id, timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_site(&self, organization: &str, name: &str, api_token: &str) -> Result<Site> {
        let created_at = now_unix()?;

        sqlx::query(
            r#"
            INSERT INTO sites (organization, name, api_token, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(organization)
        .bind(name)
        .bind(api_token)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await?;

        let site = sqlx::query_as::<_, Site>(
            r#"
            SELECT id, organization, name, api_token, created_at
            FROM sites
            WHERE api_token = ?
            "#,
        )
        .bind(api_token)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(site)
    }

    async fn get_site(&self, site_id: i64) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(
            r#"
            SELECT id, organization, name, api_token, created_at
            FROM sites
            WHERE id = ?
            "#,
        )
        .bind(site_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(site)
    }

    async fn create_import_session(&self, import_id: &str, site_id: i64) -> Result<ImportSession> {
        let now = now_unix()?;

        sqlx::query(
            r#"
            INSERT INTO import_sessions
                (import_id, site_id, status, imported_events, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(import_id)
        .bind(site_id)
        .bind(ImportStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        let session = sqlx::query_as::<_, ImportSession>(
            r#"
            SELECT import_id, site_id, status, platform, imported_events,
                   error_message, created_at, updated_at
            FROM import_sessions
            WHERE import_id = ?
            "#,
        )
        .bind(import_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    async fn get_import_session(&self, import_id: &str) -> Result<Option<ImportSession>> {
        let session = sqlx::query_as::<_, ImportSession>(
            r#"
            SELECT import_id, site_id, status, platform, imported_events,
                   error_message, created_at, updated_at
            FROM import_sessions
            WHERE import_id = ?
            "#,
        )
        .bind(import_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    async fn set_session_status(
        &self,
        import_id: &str,
        status: ImportStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_sessions
            SET status = ?, updated_at = ?
            WHERE import_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now_unix()?)
        .bind(import_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn set_session_platform(&self, import_id: &str, platform: &str) -> Result<()> {
        // Immutable once set
        sqlx::query(
            r#"
            UPDATE import_sessions
            SET platform = ?, updated_at = ?
            WHERE import_id = ? AND platform IS NULL
            "#,
        )
        .bind(platform)
        .bind(now_unix()?)
        .bind(import_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn add_imported_events(&self, import_id: &str, count: i64) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_sessions
            SET imported_events = imported_events + ?, updated_at = ?
            WHERE import_id = ?
            "#,
        )
        .bind(count)
        .bind(now_unix()?)
        .bind(import_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn finalize_session(
        &self,
        import_id: &str,
        status: ImportStatus,
        message: Option<&str>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_sessions
            SET status = ?, error_message = ?, updated_at = ?
            WHERE import_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(now_unix()?)
        .bind(import_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn insert_events(&self, events: &[StoredEvent]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for chunk in events.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                "INSERT INTO events (site_id, timestamp, session_id, hostname, pathname, \
                 query, page_title, referrer, browser, operating_system, device_type, \
                 screen_resolution, language, country, region, city, utm_source, \
                 utm_medium, utm_campaign, utm_content, utm_term, event_type, event_name) ",
            );
            builder.push_values(chunk, |mut b, event| {
                b.push_bind(event.site_id)
                    .push_bind(event.timestamp)
                    .push_bind(&event.session_id)
                    .push_bind(&event.hostname)
                    .push_bind(&event.pathname)
                    .push_bind(&event.query)
                    .push_bind(&event.page_title)
                    .push_bind(&event.referrer)
                    .push_bind(&event.browser)
                    .push_bind(&event.operating_system)
                    .push_bind(&event.device_type)
                    .push_bind(&event.screen_resolution)
                    .push_bind(&event.language)
                    .push_bind(&event.country)
                    .push_bind(&event.region)
                    .push_bind(&event.city)
                    .push_bind(&event.utm_source)
                    .push_bind(&event.utm_medium)
                    .push_bind(&event.utm_campaign)
                    .push_bind(&event.utm_content)
                    .push_bind(&event.utm_term)
                    .push_bind(&event.event_type)
                    .push_bind(&event.event_name);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(events.len() as u64)
    }

    async fn monthly_event_counts(
        &self,
        organization: &str,
        since: i64,
    ) -> Result<Vec<(String, i64)>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT strftime('%Y-%m', e.timestamp, 'unixepoch') AS month, COUNT(*) AS events
            FROM events e
            JOIN sites s ON s.id = e.site_id
            WHERE s.organization = ? AND e.timestamp >= ?
            GROUP BY month
            ORDER BY month
            "#,
        )
        .bind(organization)
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(counts)
    }
}
