use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server settings, read from `FSTR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("FSTR_DB_PATH").unwrap_or_else(|| "fstr.db".into()).into();
        let host = lookup("FSTR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("FSTR_PORT")
            .unwrap_or_else(|| "8000".into())
            .parse()
            .context("FSTR_PORT must be a port number")?;
        let max_body_mb: usize = lookup("FSTR_MAX_BODY_MB")
            .unwrap_or_else(|| "32".into())
            .parse()
            .context("FSTR_MAX_BODY_MB must be a whole number of megabytes")?;

        let max_body_bytes = max_body_mb
            .checked_mul(1024 * 1024)
            .context("FSTR_MAX_BODY_MB is too large")?;

        Ok(Self {
            db_path,
            host,
            port,
            max_body_bytes,
        })
    }
}
