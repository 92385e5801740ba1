//! Configuration management for the upload server

use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::storage::DEFAULT_MAX_VALUE_SIZE;
use crate::upload::{
    UploadLimits, DEFAULT_INACTIVITY_SECS, DEFAULT_MAX_BLOB_SIZE, DEFAULT_MAX_CHUNK_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("STORE_BACKEND must be 'memory' or 'sqlite', got {0:?}")]
    UnknownBackend(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    /// Largest value either backend accepts
    pub max_value_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_chunk_size: usize,
    pub max_blob_size: u64,
    pub session_inactivity_secs: i64,
    /// 0 = unlimited
    pub max_active_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                database_url: "sqlite:./vault-uploads.db".to_string(),
                max_value_size: DEFAULT_MAX_VALUE_SIZE,
            },
            limits: LimitsConfig {
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
                max_blob_size: DEFAULT_MAX_BLOB_SIZE,
                session_inactivity_secs: DEFAULT_INACTIVITY_SECS,
                max_active_sessions: 0,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source; unset variables take defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let backend = match lookup("STORE_BACKEND") {
            None => defaults.store.backend,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "sqlite" => StoreBackend::Sqlite,
                _ => return Err(ConfigError::UnknownBackend(value)),
            },
        };

        let config = Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: number(&lookup, "SERVER_PORT", defaults.server.port)?,
            },
            store: StoreConfig {
                backend,
                database_url: lookup("DATABASE_URL").unwrap_or(defaults.store.database_url),
                max_value_size: number(&lookup, "MAX_VALUE_SIZE", defaults.store.max_value_size)?,
            },
            limits: LimitsConfig {
                max_chunk_size: number(&lookup, "MAX_CHUNK_SIZE", defaults.limits.max_chunk_size)?,
                max_blob_size: number(&lookup, "MAX_BLOB_SIZE", defaults.limits.max_blob_size)?,
                session_inactivity_secs: number(
                    &lookup,
                    "SESSION_INACTIVITY_SECS",
                    defaults.limits.session_inactivity_secs,
                )?,
                max_active_sessions: number(
                    &lookup,
                    "MAX_ACTIVE_SESSIONS",
                    defaults.limits.max_active_sessions,
                )?,
            },
        };

        if config.limits.max_chunk_size == 0 {
            return Err(ConfigError::Zero("MAX_CHUNK_SIZE"));
        }
        if config.limits.max_blob_size == 0 {
            return Err(ConfigError::Zero("MAX_BLOB_SIZE"));
        }
        if config.limits.session_inactivity_secs <= 0 {
            return Err(ConfigError::Zero("SESSION_INACTIVITY_SECS"));
        }
        if config.store.max_value_size == 0 {
            return Err(ConfigError::Zero("MAX_VALUE_SIZE"));
        }

        Ok(config)
    }

    /// Session limits, with chunks capped at what the store will hold
    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_chunk_size: self.limits.max_chunk_size.min(self.store.max_value_size),
            max_blob_size: self.limits.max_blob_size,
            inactivity: chrono::Duration::seconds(self.limits.session_inactivity_secs),
            max_active_sessions: self.limits.max_active_sessions,
        }
    }
}

fn number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}
