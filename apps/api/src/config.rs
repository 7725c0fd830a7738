use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::analysis::OrchestratorConfig;
use crate::resilience::{BreakerConfig, CacheConfig, QueueConfig};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or unparseable.
#[derive(Debug, Clone)]
pub struct Config {
    pub capability_url: String,
    pub capability_api_key: Option<String>,
    /// Unset means an in-memory usage ledger.
    pub redis_url: Option<String>,
    /// Unset means errors are only logged.
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub capability_timeout_secs: u64,
    pub breaker_failure_ratio: f64,
    pub breaker_window_secs: u64,
    pub breaker_buckets: u32,
    pub breaker_min_calls: u32,
    pub breaker_reset_secs: u64,
    pub queue_concurrency: usize,
    pub queue_rate_limit: usize,
    pub queue_rate_interval_ms: u64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub default_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };
        let config = Config {
            capability_url: env.require("CAPABILITY_URL")?,
            capability_api_key: env.optional("CAPABILITY_API_KEY"),
            redis_url: env.optional("REDIS_URL"),
            database_url: env.optional("DATABASE_URL"),
            port: env.parse_or("PORT", 8080)?,
            rust_log: env.optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            capability_timeout_secs: env.parse_or("CAPABILITY_TIMEOUT_SECS", 30)?,
            breaker_failure_ratio: env.parse_or("BREAKER_FAILURE_RATIO", 0.5)?,
            breaker_window_secs: env.parse_or("BREAKER_WINDOW_SECS", 10)?,
            breaker_buckets: env.parse_or("BREAKER_BUCKETS", 10)?,
            breaker_min_calls: env.parse_or("BREAKER_MIN_CALLS", 5)?,
            breaker_reset_secs: env.parse_or("BREAKER_RESET_SECS", 30)?,
            queue_concurrency: env.parse_or("QUEUE_CONCURRENCY", 3)?,
            queue_rate_limit: env.parse_or("QUEUE_RATE_LIMIT", 5)?,
            queue_rate_interval_ms: env.parse_or("QUEUE_RATE_INTERVAL_MS", 1000)?,
            cache_capacity: env.parse_or("CACHE_CAPACITY", 100)?,
            cache_ttl_secs: env.parse_or("CACHE_TTL_SECS", 1800)?,
            default_timeout_ms: env.parse_or("DEFAULT_TIMEOUT_MS", 60_000)?,
        };

        anyhow::ensure!(
            config.breaker_failure_ratio > 0.0 && config.breaker_failure_ratio <= 1.0,
            "BREAKER_FAILURE_RATIO must be in (0, 1]"
        );
        anyhow::ensure!(config.breaker_buckets > 0, "BREAKER_BUCKETS must be positive");
        anyhow::ensure!(config.queue_concurrency > 0, "QUEUE_CONCURRENCY must be positive");
        anyhow::ensure!(config.queue_rate_limit > 0, "QUEUE_RATE_LIMIT must be positive");
        Ok(config)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_ratio: self.breaker_failure_ratio,
            window: Duration::from_secs(self.breaker_window_secs),
            buckets: self.breaker_buckets,
            min_calls: self.breaker_min_calls,
            reset_timeout: Duration::from_secs(self.breaker_reset_secs),
            call_timeout: Duration::from_secs(self.capability_timeout_secs),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.queue_concurrency,
            rate_limit: self.queue_rate_limit,
            rate_interval: Duration::from_millis(self.queue_rate_interval_ms),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache_capacity,
            ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cache: self.cache_config(),
            breaker: self.breaker_config(),
            queue: self.queue_config(),
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            ..OrchestratorConfig::default()
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("CAPABILITY_URL", "http://scorer:9000")]).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.redis_url.is_none());
        assert_eq!(config.queue_config().concurrency, 3);
        assert_eq!(config.queue_config().rate_limit, 5);
        assert_eq!(config.cache_config().ttl, Duration::from_secs(1800));
        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_ratio, 0.5);
        assert_eq!(breaker.min_calls, 5);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(30));
        assert_eq!(
            config.orchestrator_config().default_timeout,
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn test_missing_capability_url_fails() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("CAPABILITY_URL"));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = load(&[("CAPABILITY_URL", "http://x"), ("QUEUE_CONCURRENCY", "three")]).unwrap_err();
        assert!(err.to_string().contains("QUEUE_CONCURRENCY"));
    }

    #[test]
    fn test_blank_optional_is_unset() {
        let config = load(&[("CAPABILITY_URL", "http://x"), ("REDIS_URL", "  ")]).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_ratio_out_of_range_rejected() {
        assert!(load(&[("CAPABILITY_URL", "http://x"), ("BREAKER_FAILURE_RATIO", "1.5")]).is_err());
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with a placeholder capability URL.
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| (key == "CAPABILITY_URL").then(|| "http://scorer.test".to_string()))
            .unwrap()
    }
}
