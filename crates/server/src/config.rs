// crates/server/src/config.rs
//! Server configuration read from `JOBWATCH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jobwatch_core::{ManagerConfig, StreamConfig};
use thiserror::Error;

use crate::auth::AuthTokens;

pub const DEFAULT_PORT: u16 = 47900;
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("JOBWATCH_TOKENS entry {0:?} must look like token:user")]
    MalformedToken(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite file. `None` means the default cache location.
    pub db_path: Option<PathBuf>,
    pub auth: AuthTokens,
    pub manager: ManagerConfig,
    pub stream: StreamConfig,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db_path: None,
            auth: AuthTokens::default(),
            manager: ManagerConfig::default(),
            stream: StreamConfig::default(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or empty variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("JOBWATCH_HOST") {
            config.host = host;
        }
        if let Some((var, value)) = first_set(&get, &["JOBWATCH_PORT", "PORT"]) {
            config.port = parse(var, &value, "port")?;
        }
        if let Some(path) = get("JOBWATCH_DB") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(tokens) = get("JOBWATCH_TOKENS") {
            config.auth = parse_tokens(&tokens)?;
        }
        if let Some(ms) = get("JOBWATCH_POLL_MS") {
            config.stream.poll_interval = Duration::from_millis(positive(
                parse("JOBWATCH_POLL_MS", &ms, "millisecond count")?,
                "JOBWATCH_POLL_MS",
                &ms,
            )?);
        }
        if let Some(secs) = get("JOBWATCH_KEEPALIVE_SECS") {
            config.stream.keep_alive_interval = Duration::from_secs(positive(
                parse("JOBWATCH_KEEPALIVE_SECS", &secs, "second count")?,
                "JOBWATCH_KEEPALIVE_SECS",
                &secs,
            )?);
        }
        if let Some(polls) = get("JOBWATCH_MAX_POLLS") {
            config.stream.max_polls = positive(
                parse("JOBWATCH_MAX_POLLS", &polls, "poll count")?,
                "JOBWATCH_MAX_POLLS",
                &polls,
            )?;
        }
        if let Some(retries) = get("JOBWATCH_CAS_RETRIES") {
            config.manager.max_cas_retries = parse("JOBWATCH_CAS_RETRIES", &retries, "retry count")?;
        }
        if let Some(ms) = get("JOBWATCH_STORE_TIMEOUT_MS") {
            let timeout = Duration::from_millis(positive(
                parse("JOBWATCH_STORE_TIMEOUT_MS", &ms, "millisecond count")?,
                "JOBWATCH_STORE_TIMEOUT_MS",
                &ms,
            )?);
            config.manager.store_timeout = timeout;
            config.stream.read_timeout = timeout;
        }
        if let Some(format) = get("JOBWATCH_LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }
}

fn first_set<F>(get: &F, keys: &[&'static str]) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|key| get(key).map(|value| (*key, value)))
}

fn parse<T: FromStr>(var: &'static str, value: &str, expected: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    })
}

fn positive<T: PartialEq + Default>(n: T, var: &'static str, value: &str) -> Result<T, ConfigError> {
    if n == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            expected: "non-zero value",
        });
    }
    Ok(n)
}

/// Parse `token:user,token:user`.
pub fn parse_tokens(raw: &str) -> Result<AuthTokens, ConfigError> {
    let mut pairs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(':') {
            Some((token, user)) if !token.is_empty() && !user.is_empty() => {
                pairs.push((token.to_string(), user.to_string()));
            }
            _ => return Err(ConfigError::MalformedToken(entry.to_string())),
        }
    }
    Ok(AuthTokens::new(pairs))
}
