use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use strata_core::{StrataError, StrataResult};

const DEFAULT_CONFIG_NAME: &str = "strata.json";
pub const DEFAULT_DB_NAME: &str = "strata.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_cascade_depth: Option<usize>,
    pub write_timeout_ms: Option<u64>,
    pub max_page_size: Option<u64>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_cascade_depth: Some(16),
            write_timeout_ms: None,
            max_page_size: Some(1_000),
        }
    }
}

/// Limits with every default applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_cascade_depth: usize,
    pub write_timeout: Option<Duration>,
    pub max_page_size: u64,
}

impl StoreLimits {
    pub fn from_config(config: &StrataConfig) -> Self {
        let defaults = LimitsConfig::with_defaults();
        let limits = config.limits.clone().unwrap_or_else(LimitsConfig::with_defaults);
        Self {
            max_cascade_depth: limits
                .max_cascade_depth
                .or(defaults.max_cascade_depth)
                .unwrap_or(16),
            write_timeout: limits.write_timeout_ms.map(Duration::from_millis),
            max_page_size: limits.max_page_size.or(defaults.max_page_size).unwrap_or(1_000),
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_cascade_depth: 16,
            write_timeout: None,
            max_page_size: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrataConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
}

impl StrataConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> StrataResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| StrataError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| StrataError::storage(format!("read config: {err}")))?;
            let config: StrataConfig =
                serde_json::from_str(&raw).map_err(|err| StrataError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = StrataConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| StrataError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| StrataError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> StrataResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            DatabaseConfig::Postgres { .. } => {
                Err(StrataError::invalid("config is not sqlite backend"))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> StrataResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.to_string_lossy()))
            }
            DatabaseConfig::Postgres { url } => Ok(url.clone()),
        }
    }

    pub fn limits(&self) -> StoreLimits {
        StoreLimits::from_config(self)
    }
}
