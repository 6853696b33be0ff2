//! Configuration for the callback relay service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relay_delivery::{
    engine::DEFAULT_FAILURE_NOTICE, retry::DEFAULT_RETRY_DELAYS_SECS, ClientConfig, EngineConfig,
    RetryPolicy,
};
use relay_metrics::{MetricsConfig, DEFAULT_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::crypto::Ed25519Verifier;

const CONFIG_FILE: &str = "relay.toml";
const ENV_PREFIX: &str = "RELAY_";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `RELAY_` (highest priority)
/// 2. Configuration file (`relay.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Every field can be overridden by its upper-cased name with the prefix,
/// e.g. `RELAY_WORKER_COUNT=8` or `RELAY_RETRY_DELAYS_SECS=[1,3,9]`.
///
/// # Example
///
/// ```no_run
/// use relay_api::Config;
///
/// let config = Config::load().expect("failed to load configuration");
/// println!("listening on {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Timeout for inbound HTTP requests in seconds.
    pub request_timeout: u64,
    /// Hex-encoded ed25519 application public key.
    pub public_key: Option<String>,

    // Callback delivery
    /// Base URL of the callback API.
    pub callback_api_base: String,
    /// Timeout of each delivery attempt in seconds.
    pub delivery_timeout_seconds: u64,
    /// Timeout of the failure notice in seconds.
    pub notice_timeout_seconds: u64,
    /// Maximum 429 waits within one delivery call.
    pub max_rate_limit_waits: u32,
    /// Delivered content is truncated beyond this many characters.
    pub max_response_length: usize,

    // Processing
    /// Upstream processor endpoint.
    pub processor_url: String,
    /// Timeout of one processor call in seconds.
    pub processor_timeout_seconds: u64,

    // Engine
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Maximum requests waiting for a worker.
    pub queue_capacity: usize,
    /// Request-level retry budget.
    pub max_retries: u32,
    /// Retry budget of each delivery call.
    pub delivery_max_retries: u32,
    /// Backoff table in seconds.
    pub retry_delays_secs: Vec<u64>,
    /// Maximum wait for workers on shutdown, in seconds.
    pub shutdown_timeout_seconds: u64,
    /// Message sent once when a request fails for good.
    pub failure_notice: String,

    // Maintenance
    /// Points kept per metric series.
    pub metrics_buffer_capacity: usize,
    /// Age in seconds beyond which metric points are evicted.
    pub metrics_retention_seconds: u64,
    /// Age in seconds beyond which finished statuses are purged.
    pub status_retention_seconds: u64,
    /// Cadence of the maintenance task in seconds.
    pub maintenance_interval_seconds: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `relay.toml` and `RELAY_*`
    /// environment variables, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`Config::load`] with an explicit configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            max_retries: self.max_retries,
            delivery_max_retries: self.delivery_max_retries,
            retry_policy: self.to_retry_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_seconds),
            metrics_retention: Duration::from_secs(self.metrics_retention_seconds),
            status_retention: Duration::from_secs(self.status_retention_seconds),
            failure_notice: self.failure_notice.clone(),
            ..EngineConfig::default()
        }
    }

    /// Delivery client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base: self.callback_api_base.clone(),
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            notice_timeout: Duration::from_secs(self.notice_timeout_seconds),
            max_rate_limit_waits: self.max_rate_limit_waits,
            max_content_length: self.max_response_length,
            retry_policy: self.to_retry_policy(),
            ..ClientConfig::default()
        }
    }

    /// Backoff table shared by the engine and the client.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(&self.retry_delays_secs)
    }

    /// Metrics collector configuration.
    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig { buffer_capacity: self.metrics_buffer_capacity }
    }

    /// Timeout of one processor call.
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_seconds)
    }

    /// Timeout for inbound HTTP requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Parses the server socket address from host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr).context("invalid server address")
    }

    /// Signature verifier for the configured public key.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured or the key is malformed.
    pub fn verifier(&self) -> Result<Ed25519Verifier> {
        let Some(key) = self.public_key.as_deref() else {
            bail!("public_key must be set (RELAY_PUBLIC_KEY)");
        };
        Ed25519Verifier::from_hex(key).context("invalid public_key")
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be greater than 0");
        }
        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }
        if self.request_timeout == 0
            || self.delivery_timeout_seconds == 0
            || self.notice_timeout_seconds == 0
            || self.processor_timeout_seconds == 0
        {
            bail!("timeouts must be greater than 0");
        }
        if self.retry_delays_secs.is_empty() {
            bail!("retry_delays_secs must not be empty");
        }
        if self.callback_api_base.trim().is_empty() {
            bail!("callback_api_base must not be empty");
        }
        if self.metrics_buffer_capacity == 0 {
            bail!("metrics_buffer_capacity must be greater than 0");
        }
        if self.maintenance_interval_seconds == 0 {
            bail!("maintenance_interval_seconds must be greater than 0");
        }
        if let Some(key) = &self.public_key {
            Ed25519Verifier::from_hex(key).context("invalid public_key")?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: 10,
            public_key: None,
            callback_api_base: client.api_base,
            delivery_timeout_seconds: relay_delivery::DEFAULT_TIMEOUT_SECONDS,
            notice_timeout_seconds: 10,
            max_rate_limit_waits: client.max_rate_limit_waits,
            max_response_length: relay_delivery::DEFAULT_MAX_CONTENT_LENGTH,
            processor_url: "http://127.0.0.1:8081/process".to_string(),
            processor_timeout_seconds: 25,
            worker_count: relay_delivery::DEFAULT_WORKER_COUNT,
            queue_capacity: relay_delivery::DEFAULT_QUEUE_CAPACITY,
            max_retries: relay_delivery::DEFAULT_MAX_RETRIES,
            delivery_max_retries: relay_delivery::DEFAULT_MAX_RETRIES,
            retry_delays_secs: DEFAULT_RETRY_DELAYS_SECS.to_vec(),
            shutdown_timeout_seconds: 30,
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
            metrics_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            metrics_retention_seconds: 86_400,
            status_retention_seconds: 3_600,
            maintenance_interval_seconds: 3_600,
            rust_log: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            self.originals.entry(key.to_string()).or_insert_with(|| env::var(key).ok());
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for (key, original) in &self.originals {
                match original {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    const MISSING_FILE: &str = "does-not-exist.toml";

    #[test]
    fn defaults_are_valid() {
        let _guard = TestEnvGuard::new();
        let config = Config::load_from(MISSING_FILE).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.retry_delays_secs, vec![1, 2, 5, 10]);
        assert_eq!(config.to_engine_config().metrics_retention, Duration::from_secs(86_400));
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("RELAY_WORKER_COUNT", "8");
        guard.set_var("RELAY_QUEUE_CAPACITY", "250");
        guard.set_var("RELAY_RETRY_DELAYS_SECS", "[1, 3, 9]");
        guard.set_var("RELAY_CALLBACK_API_BASE", "http://localhost:9999/api");

        let config = Config::load_from(MISSING_FILE).unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_capacity, 250);
        assert_eq!(config.to_retry_policy(), RetryPolicy::from_secs(&[1, 3, 9]));
        assert_eq!(config.to_client_config().api_base, "http://localhost:9999/api");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_workers = Config { worker_count: 0, ..Config::default() };
        assert!(zero_workers.validate().is_err());

        let no_delays = Config { retry_delays_secs: Vec::new(), ..Config::default() };
        assert!(no_delays.validate().is_err());

        let zero_timeout = Config { delivery_timeout_seconds: 0, ..Config::default() };
        assert!(zero_timeout.validate().is_err());

        let bad_key = Config { public_key: Some("xyz".to_string()), ..Config::default() };
        assert!(bad_key.validate().is_err());
    }

    #[test]
    fn verifier_requires_a_key() {
        assert!(Config::default().verifier().is_err());

        let key = hex::encode(
            ed25519_dalek::SigningKey::from_bytes(&[1u8; 32]).verifying_key().to_bytes(),
        );
        let config = Config { public_key: Some(key), ..Config::default() };
        assert!(config.validate().is_ok());
        assert!(config.verifier().is_ok());
    }

    #[test]
    fn conversions_carry_values() {
        let config = Config {
            worker_count: 3,
            max_retries: 1,
            delivery_max_retries: 2,
            max_response_length: 500,
            ..Config::default()
        };

        let engine = config.to_engine_config();
        assert_eq!(engine.worker_count, 3);
        assert_eq!(engine.max_retries, 1);
        assert_eq!(engine.delivery_max_retries, 2);

        let client = config.to_client_config();
        assert_eq!(client.max_content_length, 500);
        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(config.parse_server_addr().unwrap().port(), 8000);
    }
}
