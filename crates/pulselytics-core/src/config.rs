use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub geoip_path: String,
    pub cors_origins: Vec<String>,
    /// Passed straight to DuckDB's memory_limit pragma, e.g. "512MB".
    pub duckdb_memory_limit: String,
    pub query_timeout_ms: u64,
    pub buffer_flush_interval_ms: u64,
    pub buffer_max_size: usize,
    pub rate_limit_disabled: bool,
    /// Site to create at startup when it does not exist yet; lets a fresh
    /// container accept beacons without a provisioning step.
    pub seed_site_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("PULSELYTICS_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("PULSELYTICS_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            geoip_path: std::env::var("PULSELYTICS_GEOIP_PATH")
                .unwrap_or_else(|_| "./GeoLite2-City.mmdb".to_string()),
            cors_origins: std::env::var("PULSELYTICS_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            duckdb_memory_limit: std::env::var("PULSELYTICS_DUCKDB_MEMORY_LIMIT")
                .unwrap_or_else(|_| "512MB".to_string()),
            query_timeout_ms: std::env::var("PULSELYTICS_QUERY_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10_000),
            buffer_flush_interval_ms: 1000,
            buffer_max_size: 1000,
            rate_limit_disabled: std::env::var("PULSELYTICS_DISABLE_RATE_LIMIT")
                .map(|v| v == "true")
                .unwrap_or(false),
            seed_site_id: std::env::var("PULSELYTICS_SEED_SITE").ok(),
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn buffer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_flush_interval_ms)
    }
}
