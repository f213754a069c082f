use std::{env, fmt::Display, fs::read_to_string, process, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_db: u32,
    pub broker_password: Option<String>,
    pub block_ms: u64,
    pub pool_size: usize,
    pub identity: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            broker_host: try_load("BROKER_HOST", "localhost"),
            broker_port: try_load("BROKER_PORT", "6379"),
            broker_db: try_load("BROKER_DB", "0"),
            broker_password: read_optional_secret("BROKER_PASSWORD"),
            block_ms: try_load("CONSUMER_BLOCK_MS", "1000"),
            pool_size: try_load("CONSUMER_POOL_SIZE", "1"),
            identity: try_load("CONSUMER_IDENTITY", &default_identity()),
        }
    }

    pub fn broker_url(&self) -> String {
        match &self.broker_password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.broker_host, self.broker_port, self.broker_db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.broker_host, self.broker_port, self.broker_db
            ),
        }
    }
}

/// Unique per process so concurrent consumers never share a name.
fn default_identity() -> String {
    let host = env::var("HOSTNAME").unwrap_or_else(|_| "stratus".to_string());
    format!("{host}-{}", process::id())
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_optional_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret mounted: {e}");
        })
        .ok()
}
