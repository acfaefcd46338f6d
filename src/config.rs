// src/config.rs
use log::info;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://stock.indianapi.in";
const DEFAULT_WATCHLIST: &str = "RELIANCE,TCS,HDFCBANK,INFY,ICICIBANK";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_keys: Vec<String>,
    pub base_url: String,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub upstream_timeout: Duration,
    pub environment: Environment,
    pub cache_max_entries: usize,
    pub purge_interval: Duration,
    pub watchlist: Vec<String>,
    pub warmup_interval: Option<Duration>,
    pub scylla_node: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_keys = split_list(&required(lookup, "STOCK_API_KEY")?);
        if api_keys.is_empty() {
            return Err(ConfigError::Missing("STOCK_API_KEY"));
        }

        let base_url = parse_base_url(
            &optional(lookup, "STOCK_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;

        let cors_origins = match optional(lookup, "CORS_ORIGIN") {
            None => Vec::new(),
            Some(raw) if raw == "*" => Vec::new(),
            Some(raw) => split_list(&raw)
                .iter()
                .map(|origin| parse_origin(origin))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let upstream_timeout = positive(lookup, "UPSTREAM_TIMEOUT_SECS", 10)?;
        let purge_interval = positive(lookup, "CACHE_PURGE_INTERVAL_SECS", 60)?;

        let cache_max_entries: usize = parse_or(lookup, "CACHE_MAX_ENTRIES", 1000)?;
        if cache_max_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "CACHE_MAX_ENTRIES",
                reason: "must be greater than zero".to_string(),
            });
        }

        let watchlist: Vec<String> = split_list(
            &optional(lookup, "WATCHLIST").unwrap_or_else(|| DEFAULT_WATCHLIST.to_string()),
        )
        .into_iter()
        .map(|symbol| symbol.to_ascii_uppercase())
        .collect();
        if watchlist.is_empty() {
            return Err(ConfigError::Invalid {
                key: "WATCHLIST",
                reason: "must name at least one symbol".to_string(),
            });
        }

        let warmup_secs: u64 = parse_or(lookup, "WARMUP_INTERVAL_SECS", 300)?;

        Ok(Config {
            port: parse_or(lookup, "PORT", 5000)?,
            api_keys,
            base_url,
            cors_origins,
            upstream_timeout,
            environment: parse_or(lookup, "APP_ENV", Environment::Development)?,
            cache_max_entries,
            purge_interval,
            watchlist,
            warmup_interval: (warmup_secs > 0).then(|| Duration::from_secs(warmup_secs)),
            scylla_node: optional(lookup, "SCYLLA_NODE"),
        })
    }

    pub fn expose_error_details(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn optional(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

fn parse_or<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{:?}: {}", raw, e),
        }),
        None => {
            info!("{} not set, using default", key);
            Ok(default)
        }
    }
}

fn positive(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(lookup, key, default_secs)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn parse_base_url(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key: "STOCK_API_BASE_URL",
        reason: format!("{:?}: {}", raw, e),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key: "STOCK_API_BASE_URL",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

// Browsers send origins as scheme://host[:port], so anything with a path is rejected.
fn parse_origin(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "CORS_ORIGIN",
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(format!("{:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid(format!("{:?} is not an http(s) origin", raw)));
    }
    if url.path() != "/" || url.query().is_some() {
        return Err(invalid(format!("{:?} must not carry a path or query", raw)));
    }
    Ok(url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(&move |key: &str| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = load(&[("STOCK_API_KEY", "k1")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.api_keys, vec!["k1"]);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.watchlist.len(), 5);
        assert_eq!(config.warmup_interval, Some(Duration::from_secs(300)));
        assert!(config.scylla_node.is_none());
        assert!(config.expose_error_details());
    }

    #[test]
    fn missing_api_key_aborts() {
        assert_eq!(
            load(&[("PORT", "8080")]).unwrap_err(),
            ConfigError::Missing("STOCK_API_KEY")
        );
        assert_eq!(
            load(&[("STOCK_API_KEY", " , ")]).unwrap_err(),
            ConfigError::Missing("STOCK_API_KEY")
        );
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = load(&[("STOCK_API_KEY", "k1"), ("PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn key_list_and_watchlist_are_split_and_trimmed() {
        let config = load(&[
            ("STOCK_API_KEY", "k1, k2 ,,k3"),
            ("WATCHLIST", "tcs, infy"),
            ("WARMUP_INTERVAL_SECS", "0"),
            ("APP_ENV", "production"),
        ])
        .unwrap();
        assert_eq!(config.api_keys, vec!["k1", "k2", "k3"]);
        assert_eq!(config.watchlist, vec!["TCS", "INFY"]);
        assert_eq!(config.warmup_interval, None);
        assert!(!config.expose_error_details());
    }

    #[test]
    fn cors_origin_must_be_a_bare_origin() {
        let config = load(&[
            ("STOCK_API_KEY", "k1"),
            ("CORS_ORIGIN", "http://localhost:3000/"),
        ])
        .unwrap();
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);

        let err = load(&[
            ("STOCK_API_KEY", "k1"),
            ("CORS_ORIGIN", "http://localhost:3000/app"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CORS_ORIGIN", .. }));
    }

    #[test]
    fn zero_timeout_and_bad_base_url_are_rejected() {
        let err = load(&[("STOCK_API_KEY", "k1"), ("UPSTREAM_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "UPSTREAM_TIMEOUT_SECS",
                ..
            }
        ));

        let err = load(&[
            ("STOCK_API_KEY", "k1"),
            ("STOCK_API_BASE_URL", "ftp://stock.indianapi.in"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "STOCK_API_BASE_URL",
                ..
            }
        ));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let err = load(&[("STOCK_API_KEY", "k1"), ("APP_ENV", "staging")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "APP_ENV", .. }));
    }
}
