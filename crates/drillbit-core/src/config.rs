use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub behavioral_db_path: String,
    pub conversion_db_path: String,
    /// DuckDB size string such as `"1GB"` or `"512MB"`, applied to both stores.
    pub duckdb_memory_limit: String,
    pub pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub max_report_rows: u32,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            behavioral_db_path: "./data/behavioral.db".to_string(),
            conversion_db_path: "./data/conversion.db".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            pool_size: 4,
            acquire_timeout_ms: 2_000,
            query_timeout_ms: 15_000,
            max_report_rows: 1_000,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            port: std::env::var("DRILLBIT_PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            behavioral_db_path: std::env::var("DRILLBIT_BEHAVIORAL_DB")
                .unwrap_or(defaults.behavioral_db_path),
            conversion_db_path: std::env::var("DRILLBIT_CONVERSION_DB")
                .unwrap_or(defaults.conversion_db_path),
            duckdb_memory_limit: std::env::var("DRILLBIT_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            pool_size: std::env::var("DRILLBIT_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.pool_size),
            acquire_timeout_ms: std::env::var("DRILLBIT_ACQUIRE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.acquire_timeout_ms),
            query_timeout_ms: std::env::var("DRILLBIT_QUERY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.query_timeout_ms),
            max_report_rows: std::env::var("DRILLBIT_MAX_REPORT_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|rows: &u32| *rows > 0)
                .unwrap_or(defaults.max_report_rows),
            cors_origins: std::env::var("DRILLBIT_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
