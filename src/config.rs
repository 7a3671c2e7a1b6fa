use anyhow::{bail, Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::auth::MIN_PASSWORD_LENGTH;
use crate::model::DEFAULT_SHOP_NAME;

/// Smallest request body limit that still fits a realistic shop record
const MIN_BODY_BYTES: usize = 1024;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Admin password used to seed the stored hash on first run only.
    /// After that the stored hash wins; change it through the admin API.
    pub admin_password: String,

    // Shown on the board; only used when creating the record
    pub shop_name: String,

    // HTTP listener
    pub bind_addr: IpAddr,
    pub port: u16,

    // JSON file holding the shop record
    pub data_file: PathBuf,

    // Largest accepted request body
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            admin_password: get("ADMIN_PASSWORD").context("ADMIN_PASSWORD not set")?,

            shop_name: get("SHOP_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHOP_NAME.to_string()),

            bind_addr: get("BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0".to_string())
                .parse()
                .context("BIND_ADDR must be an IP address")?,
            port: get("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid port number")?,

            data_file: get("DATA_FILE")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "./data/shop.json".to_string())
                .into(),

            max_body_bytes: get("MAX_BODY_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(64 * 1024),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &std::collections::HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.admin_password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.push(format!(
                "ADMIN_PASSWORD must be at least {} characters.",
                MIN_PASSWORD_LENGTH
            ));
        }

        if self.data_file.is_dir() {
            errors.push(format!(
                "DATA_FILE '{}' is a directory, expected a file path.",
                self.data_file.display()
            ));
        }

        if self.max_body_bytes < MIN_BODY_BYTES {
            errors.push(format!(
                "MAX_BODY_BYTES={} is too small (min: {}).",
                self.max_body_bytes, MIN_BODY_BYTES
            ));
        } else if self.max_body_bytes > MAX_BODY_BYTES {
            errors.push(format!(
                "MAX_BODY_BYTES={} seems too large (max recommended: {}).",
                self.max_body_bytes, MAX_BODY_BYTES
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}
