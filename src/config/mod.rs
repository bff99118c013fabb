//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The broker URL carries credentials and is held as a
//! `SecretString`.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug)]
pub struct Config {
    pub amqp_url: SecretString,
    /// Maximum unacknowledged deliveries, and concurrent jobs.
    pub prefetch_count: u16,
    pub workers_dir: PathBuf,
    pub work_dir: PathBuf,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let prefetch_count = parsed_var("PREFETCH_COUNT", 1u16)?;
        if prefetch_count == 0 {
            return Err(Error::Config("PREFETCH_COUNT must be at least 1".to_string()));
        }

        Ok(Self {
            amqp_url: SecretString::from(required_var("AMQP_URL")?),
            prefetch_count,
            workers_dir: optional_var("WORKERS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("workers")),
            work_dir: optional_var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("jobroute")),
            storage_root: optional_var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("outputs")),
            public_base_url: optional_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:9000/outputs".to_string()),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are treated the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        None => Ok(default),
    }
}
