use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Events admitted per calendar month per organization.
    pub monthly_event_limit: i64,

    /// Trailing window of calendar months tracked by the quota, ending
    /// at the current month.
    pub quota_window_months: u32,

    /// Hard cap on events per batch accepted by the server.
    pub max_batch_size: usize,
}

impl ImportConfig {
    const fn default_monthly_event_limit() -> i64 {
        100_000
    }

    const fn default_quota_window_months() -> u32 {
        12
    }

    const fn default_max_batch_size() -> usize {
        10_000
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            monthly_event_limit: Self::default_monthly_event_limit(),
            quota_window_months: Self::default_quota_window_months(),
            max_batch_size: Self::default_max_batch_size(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./marten.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let monthly_event_limit = std::env::var("MONTHLY_EVENT_LIMIT")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_else(ImportConfig::default_monthly_event_limit);

        let quota_window_months = std::env::var("QUOTA_WINDOW_MONTHS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or_else(ImportConfig::default_quota_window_months);

        let max_batch_size = std::env::var("IMPORT_MAX_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or_else(ImportConfig::default_max_batch_size);

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            import: ImportConfig {
                monthly_event_limit,
                quota_window_months,
                max_batch_size,
            },
        })
    }
}
