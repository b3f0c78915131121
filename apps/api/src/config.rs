use anyhow::{Context, Result};
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
/// Panics at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle_api_key: String,
    pub oracle_model: String,
    pub oracle_fallback_model: Option<String>,
    pub oracle_timeout_secs: u64,
    pub data_dir: PathBuf,
    pub max_in_tl_rounds: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            oracle_api_key: require_env("ORACLE_API_KEY")?,
            oracle_model: std::env::var("ORACLE_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            oracle_fallback_model: std::env::var("ORACLE_FALLBACK_MODEL").ok(),
            oracle_timeout_secs: std::env::var("ORACLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .context("ORACLE_TIMEOUT_SECS must be a valid integer")?,
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            max_in_tl_rounds: std::env::var("MAX_IN_TL_ROUNDS")
                .unwrap_or_else(|_| "6".to_string())
                .parse::<u32>()
                .context("MAX_IN_TL_ROUNDS must be a valid integer")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
