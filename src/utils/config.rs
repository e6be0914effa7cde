use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set when STORE_BACKEND=mongo")]
    Missing { name: &'static str },
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Mongo { uri: String, db_name: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_addr: SocketAddr,
    pub cors_origin: Option<String>,
    pub store: StoreBackend,
    pub session_secret: String,
    pub mutation_retry: RetryPolicy,
    pub reconnect_retry: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_addr = parse_or(&lookup, "SERVER_ADDR", "0.0.0.0:8000".parse().ok())?;

        let store = match lookup("STORE_BACKEND").as_deref() {
            None | Some("memory") => StoreBackend::Memory,
            Some("mongo") => StoreBackend::Mongo {
                uri: lookup("MONGO_URI").ok_or(ConfigError::Missing { name: "MONGO_URI" })?,
                db_name: lookup("DB_NAME").ok_or(ConfigError::Missing { name: "DB_NAME" })?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let defaults = RetryPolicy::default();
        let mutation_retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "MUTATION_MAX_ATTEMPTS", Some(defaults.max_attempts))?,
            base_delay: Duration::from_millis(parse_or(&lookup, "MUTATION_BASE_DELAY_MS", Some(10))?),
            max_delay: Duration::from_millis(parse_or(&lookup, "MUTATION_MAX_DELAY_MS", Some(250))?),
        };
        if mutation_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "MUTATION_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let reconnect_retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", Some(8))?,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };

        Ok(Self {
            server_addr,
            cors_origin: lookup("CORS_ORIGIN"),
            store,
            session_secret: lookup("SESSION_SECRET")
                .unwrap_or_else(|| "default-secret-key".to_string()),
            mutation_retry,
            reconnect_retry,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => default.ok_or(ConfigError::Missing { name }),
    }
}
