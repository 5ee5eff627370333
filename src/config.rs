use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub frontend_origin: String,
    pub seed_admin_emails: Vec<String>,
    pub import_max_bytes: usize,
    pub map_activity_limit: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage = match lookup("STORAGE_BACKEND").as_deref() {
            None | Some("mongo") => StorageBackend::Mongo,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let mongo_uri = lookup("MONGO_URI");
        if storage == StorageBackend::Mongo && mongo_uri.is_none() {
            return Err(ConfigError::Missing("MONGO_URI"));
        }

        Ok(Self {
            storage,
            mongo_uri,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "field_crm".to_string()),
            jwt_secret: lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            seed_admin_emails: lookup("SEED_ADMIN_EMAILS")
                .map(|list| {
                    list.split(',')
                        .map(|email| email.trim().to_lowercase())
                        .filter(|email| !email.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            import_max_bytes: parse_or("IMPORT_MAX_BYTES", &lookup, 10 * 1024 * 1024)?,
            map_activity_limit: parse_or("MAP_ACTIVITY_LIMIT", &lookup, 500)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            storage: StorageBackend::Memory,
            mongo_uri: None,
            database_name: "field_crm_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            seed_admin_emails: Vec::new(),
            import_max_bytes: 1024 * 1024,
            map_activity_limit: 500,
        }
    }
}
