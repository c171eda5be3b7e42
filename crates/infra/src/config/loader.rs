//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes the working directory for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required:
//! - `CADENZA_CLIENT_ID`: application client id
//! - `CADENZA_GRANT`: `authorization_code`, `pkce` or `client_credentials`
//!
//! Optional:
//! - `CADENZA_CLIENT_SECRET`, `CADENZA_REDIRECT_URI`
//! - `CADENZA_SCOPES`: space- or comma-separated scope list
//! - `CADENZA_TOKEN_CACHE_PATH`: JSON file persisting the token snapshot
//! - `CADENZA_API_BASE_URL`, `CADENZA_ACCOUNTS_BASE_URL`
//! - `CADENZA_MAX_RATE_LIMIT_RETRIES`, `CADENZA_REQUEST_TIMEOUT_SECS`
//!
//! ## File Locations
//! The loader probes, in order: `./cadenza.json`, `./cadenza.toml`,
//! `./config.json`, `./config.toml`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use cadenza_domain::{ApiError, ClientConfig, Config, CredentialsConfig, GrantKind, Result};

use crate::errors::InfraError;

const CONFIG_FILE_NAMES: [&str; 4] = ["cadenza.json", "cadenza.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `ApiError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded settings are inconsistent
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `ApiError::Config` if required variables are missing, values do
/// not parse, or the result fails validation.
pub fn load_from_env() -> Result<Config> {
    let grant = GrantKind::from_str(&env_var("CADENZA_GRANT")?)?;
    let mut credentials = CredentialsConfig::new(grant, env_var("CADENZA_CLIENT_ID")?);
    credentials.client_secret = env_opt("CADENZA_CLIENT_SECRET");
    credentials.redirect_uri = env_opt("CADENZA_REDIRECT_URI");
    credentials.token_cache_path = env_opt("CADENZA_TOKEN_CACHE_PATH").map(PathBuf::from);
    if let Some(scopes) = env_opt("CADENZA_SCOPES") {
        credentials.scopes = split_scopes(&scopes);
    }

    let mut client = ClientConfig::default();
    if let Some(url) = env_opt("CADENZA_API_BASE_URL") {
        client.api_base_url = url;
    }
    if let Some(url) = env_opt("CADENZA_ACCOUNTS_BASE_URL") {
        client.accounts_base_url = url;
    }
    if let Some(retries) = env_opt("CADENZA_MAX_RATE_LIMIT_RETRIES") {
        client.max_rate_limit_retries = retries
            .parse()
            .map_err(|e| ApiError::Config(format!("Invalid max rate limit retries: {}", e)))?;
    }
    if let Some(timeout) = env_opt("CADENZA_REQUEST_TIMEOUT_SECS") {
        client.request_timeout_secs =
            timeout.parse().map_err(|e| ApiError::Config(format!("Invalid request timeout: {}", e)))?;
    }

    let config = Config { client, credentials };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations (see
/// [`probe_config_paths`]). The format follows the file extension.
///
/// # Errors
/// Returns `ApiError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or the settings fail validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ApiError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ApiError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| ApiError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    let parsed: std::result::Result<Config, InfraError> = match extension {
        "toml" => toml::from_str(contents).map_err(InfraError::from),
        "json" => serde_json::from_str(contents).map_err(InfraError::from),
        _ => return Err(ApiError::Config(format!("Unsupported config format: {}", extension))),
    };
    Ok(parsed?)
}

/// Probe the working directory for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    probe_in(&cwd)
}

fn probe_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES.iter().map(|name| dir.join(name)).find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| ApiError::Config(format!("Missing required environment variable: {}", key)))
}

/// Set and non-blank, trimmed.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}
