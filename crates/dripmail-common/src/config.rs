//! Configuration for dripmail

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `DRIPMAIL__DATABASE__URL`
const ENV_PREFIX: &str = "DRIPMAIL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Step scheduling and delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lower bound of the per-contact jitter increment, in seconds
    #[serde(default = "default_jitter_min")]
    pub jitter_min_secs: u64,

    /// Upper bound of the per-contact jitter increment, in seconds
    #[serde(default = "default_jitter_max")]
    pub jitter_max_secs: u64,

    /// How far in the past a freshly computed due time may be and still be
    /// armed. Recovered schedules get no tolerance.
    #[serde(default = "default_past_due_tolerance")]
    pub past_due_tolerance_secs: u64,

    /// SMTP connect/verify/send timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_min_secs: default_jitter_min(),
            jitter_max_secs: default_jitter_max(),
            past_due_tolerance_secs: default_past_due_tolerance(),
            smtp_timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_jitter_min() -> u64 {
    10
}

fn default_jitter_max() -> u64 {
    40
}

fn default_past_due_tolerance() -> u64 {
    5
}

fn default_smtp_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the first file found in the default locations,
    /// then apply `DRIPMAIL__*` environment overrides.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./dripmail.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/dripmail/config.toml"),
        ];

        let file = paths.iter().find(|p| p.exists());
        Self::load_layered(file.map(PathBuf::as_path))
    }

    /// Layer an optional file with environment overrides
    pub fn load_layered(file: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }

    /// Validate values that serde cannot check on its own
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.jitter_min_secs > self.scheduler.jitter_max_secs {
            return Err(crate::Error::Config(
                "scheduler.jitter_min_secs must not exceed scheduler.jitter_max_secs".to_string(),
            ));
        }

        match self.database.backend.as_str() {
            "postgres" | "memory" => Ok(()),
            other => Err(crate::Error::Config(format!(
                "Unsupported database backend: {}",
                other
            ))),
        }
    }
}
