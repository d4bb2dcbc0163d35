use std::net::SocketAddr;

use tracing::warn;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATABASE_PATH: &str = "outreach.db";

/// Server configuration, read from the environment.
///
/// - `HOST`: bind address (default 127.0.0.1)
/// - `PORT`: bind port (default 8080)
/// - `DATABASE_PATH`: SQLite file, or `:memory:` (default `outreach.db`)
/// - `CORS_ORIGIN`: allowed dashboard origin; any origin when unset
///
/// `RUST_LOG` is read separately by the log subscriber. A `.env` file in the
/// working directory is loaded into the environment first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            cors_origin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unusable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid PORT, using {}", DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => defaults.port,
        };

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port,
            database_path: non_empty("DATABASE_PATH").unwrap_or(defaults.database_path),
            cors_origin: non_empty("CORS_ORIGIN"),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
