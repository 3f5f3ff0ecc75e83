use std::env;

use thiserror::Error;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set")]
    MissingDatabaseUrl,
}

/// Runtime configuration for the ingester, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Default list-id override, used when the command line gives none.
    pub list_id: Option<String>,
    /// Apply pending migrations before ingesting.
    pub run_migrations: bool,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_optional("DATABASE_URL"),
            max_connections: env_u32("PATCHWORK_DB_MAX_CONNECTIONS", 5),
            list_id: env_optional("PATCHWORK_LIST_ID"),
            run_migrations: env_bool("PATCHWORK_RUN_MIGRATIONS", true),
        }
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// The list-id to force, preferring an explicit one.
    pub fn list_id_override<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.list_id.as_deref())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
