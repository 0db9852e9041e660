//! Exchange configuration.

use std::time::Duration;

use swapsettle_common::time::constants;

/// Store access configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database URL (used when built with the `postgres` feature).
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// Deadline for a single-record store operation.
    pub operation_timeout: Duration,
    /// Deadline for a multi-record scan.
    pub scan_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            operation_timeout: constants::store_operation_timeout(),
            scan_timeout: constants::store_scan_timeout(),
        }
    }
}

/// Settlement processing configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Conditional-update attempts per counter-order before giving up.
    pub max_conflict_retries: u32,
    /// Pair lock acquisition timeout.
    pub lock_acquisition_timeout: Duration,
    /// Run settlement synchronously after each placement.
    pub settle_on_create: bool,
    /// Enable the background retry worker.
    pub retry_worker_enabled: bool,
    /// Interval between sweeps of open orders.
    pub retry_sweep_interval: Duration,
    /// Delay before a queued order is re-settled.
    pub retry_backoff: Duration,
    /// Capacity of the retry queue.
    pub retry_queue_depth: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: constants::MAX_CONFLICT_RETRIES,
            lock_acquisition_timeout: constants::lock_acquisition_timeout(),
            settle_on_create: true,
            retry_worker_enabled: true,
            retry_sweep_interval: constants::retry_sweep_interval(),
            retry_backoff: constants::retry_backoff(),
            retry_queue_depth: 1024,
        }
    }
}

/// Main exchange configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Node ID, used in logs.
    pub node_id: Option<String>,
    /// Store configuration.
    pub store_config: StoreConfig,
    /// Settlement configuration.
    pub settlement_config: SettlementConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            store_config: StoreConfig::default(),
            settlement_config: SettlementConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl ExchangeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("SWAPSETTLE_NODE_ID") {
            config.node_id = Some(id);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store_config.database_url = Some(url);
        }

        if let Some(n) = env_parse("SWAPSETTLE_DB_MAX_CONNECTIONS") {
            config.store_config.max_connections = n;
        }

        if let Some(timeout) = env_millis("SWAPSETTLE_STORE_TIMEOUT_MS") {
            config.store_config.operation_timeout = timeout;
        }

        if let Some(timeout) = env_millis("SWAPSETTLE_SCAN_TIMEOUT_MS") {
            config.store_config.scan_timeout = timeout;
        }

        let settlement = &mut config.settlement_config;

        if let Some(n) = env_parse("SWAPSETTLE_MAX_CONFLICT_RETRIES") {
            settlement.max_conflict_retries = n;
        }

        if let Some(timeout) = env_millis("SWAPSETTLE_LOCK_TIMEOUT_MS") {
            settlement.lock_acquisition_timeout = timeout;
        }

        if let Some(flag) = env_parse("SWAPSETTLE_SETTLE_ON_CREATE") {
            settlement.settle_on_create = flag;
        }

        if let Some(flag) = env_parse("SWAPSETTLE_RETRY_WORKER") {
            settlement.retry_worker_enabled = flag;
        }

        if let Some(interval) = env_millis("SWAPSETTLE_RETRY_SWEEP_MS") {
            settlement.retry_sweep_interval = interval;
        }

        if let Some(backoff) = env_millis("SWAPSETTLE_RETRY_BACKOFF_MS") {
            settlement.retry_backoff = backoff;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.store_config.operation_timeout.is_zero() {
            return Err("Store operation timeout cannot be 0".to_string());
        }

        if self.store_config.scan_timeout < self.store_config.operation_timeout {
            return Err("Scan timeout cannot be shorter than the operation timeout".to_string());
        }

        if let Some(url) = &self.store_config.database_url {
            if url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
        }

        if self.settlement_config.max_conflict_retries == 0 {
            return Err("Max conflict retries must be at least 1".to_string());
        }

        if self.settlement_config.lock_acquisition_timeout.is_zero() {
            return Err("Lock acquisition timeout cannot be 0".to_string());
        }

        if self.settlement_config.retry_worker_enabled
            && (self.settlement_config.retry_queue_depth == 0
                || self.settlement_config.retry_sweep_interval.is_zero())
        {
            return Err("Retry worker needs a queue depth and sweep interval".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExchangeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.store_config.scan_timeout, Duration::from_secs(20));
        assert!(config.settlement_config.settle_on_create);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ExchangeConfig::default();
        config.settlement_config.max_conflict_retries = 0;
        assert!(config.validate().is_err());

        let mut config = ExchangeConfig::default();
        config.store_config.scan_timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
