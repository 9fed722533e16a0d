use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Process configuration, read from `CHIRP_*` environment variables
/// (a `.env` file is loaded first when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub persist_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("CHIRP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("CHIRP_PORT")
            .unwrap_or_else(|| "4000".into())
            .parse()
            .context("CHIRP_PORT must be a port number")?;
        let db_path: PathBuf = lookup("CHIRP_DB_PATH")
            .unwrap_or_else(|| "chirp.db".into())
            .into();
        let timeout_ms: u64 = lookup("CHIRP_PERSIST_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("CHIRP_PERSIST_TIMEOUT_MS must be a number of milliseconds")?;

        Ok(Self {
            host,
            port,
            db_path,
            persist_timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
