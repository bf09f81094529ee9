//! Environment-driven configuration.
//!
//! `SYNERGYSPHERE_ENV` picks one of exactly two environments, each with a
//! fixed base URL. `SYNERGYSPHERE_API_URL` overrides the URL and
//! `SYNERGYSPHERE_TIMEOUT_SECS` the request timeout.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const ENV_VAR: &str = "SYNERGYSPHERE_ENV";
pub const API_URL_VAR: &str = "SYNERGYSPHERE_API_URL";
pub const TIMEOUT_VAR: &str = "SYNERGYSPHERE_TIMEOUT_SECS";

pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:5000/api";
pub const PRODUCTION_BASE_URL: &str = "https://synergysphere-backend.run.app/api";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown environment '{0}' (expected 'development' or 'production')")]
    UnknownEnvironment(String),

    #[error("invalid {} value '{}'", TIMEOUT_VAR, .0)]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Development => DEVELOPMENT_BASE_URL,
            Environment::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Base URL without a trailing slash; endpoints are appended verbatim.
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Config {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            base_url: environment.base_url().to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup(ENV_VAR) {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => Environment::default(),
        };

        let mut config = Config::new(environment);

        if let Some(url) = lookup(API_URL_VAR).filter(|u| !u.trim().is_empty()) {
            config = config.with_base_url(url.trim());
        }

        if let Some(raw) = lookup(TIMEOUT_VAR) {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(raw.clone()))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_development() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.base_url, DEVELOPMENT_BASE_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_production_selects_fixed_url() {
        let config = Config::from_lookup(lookup(&[(ENV_VAR, "production")])).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.base_url, PRODUCTION_BASE_URL);

        let short = Config::from_lookup(lookup(&[(ENV_VAR, "PROD")])).unwrap();
        assert_eq!(short.environment, Environment::Production);
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let err = Config::from_lookup(lookup(&[(ENV_VAR, "staging")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownEnvironment("staging".to_string()));
    }

    #[test]
    fn test_url_override_trims_trailing_slash() {
        let config = Config::from_lookup(lookup(&[
            (ENV_VAR, "production"),
            (API_URL_VAR, "http://127.0.0.1:8080/api/"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.base_url, "http://127.0.0.1:8080/api");
    }

    #[test]
    fn test_timeout_override() {
        let config = Config::from_lookup(lookup(&[(TIMEOUT_VAR, "5")])).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));

        assert!(Config::from_lookup(lookup(&[(TIMEOUT_VAR, "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[(TIMEOUT_VAR, "soon")])).is_err());
    }

    #[test]
    fn test_environment_display_roundtrip() {
        for env in [Environment::Development, Environment::Production] {
            assert_eq!(env.to_string().parse::<Environment>().unwrap(), env);
        }
    }
}
