//! Plane-wide configuration: every key enumerated in the external-interfaces
//! section, with cross-field validation and a fluent builder.
//!
//! Grounded on the teacher's `message_router::config` module
//! (`RouterConfig` / `RouterConfigBuilder`): validated domain-typed fields,
//! `development()`/`production()` presets, a `validate()` pass doing
//! cross-field consistency checks, and JSON load/save via `serde_json`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{MillisDuration, PunishmentFactor, RecoveryPeriodMs, WorkerPoolSize};

/// Errors raised while building or loading a [`PlaneConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Why it failed.
        reason: String,
    },
    /// Reading or writing the configuration file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file was not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// MQTT-specific settings, nested under `mqtt.*` per the external-interfaces
/// configuration keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// `mqtt.keep-alive-seconds`, default 60.
    pub keep_alive_seconds: u64,
    /// `mqtt.reconnect-sleep-ms`, default 1000.
    pub reconnect_sleep_ms: u64,
    /// `mqtt.qos`, default 1.
    pub qos: u8,
    /// `mqtt.retain`, default false.
    pub retain: bool,
    /// `mqtt.priority-label`, default "low".
    pub priority_label: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_seconds: 60,
            reconnect_sleep_ms: 1000,
            qos: 1,
            retain: false,
            priority_label: "low".to_string(),
        }
    }
}

/// URL-selector settings, nested under `url-selector.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlSelectorConfig {
    /// `url-selector.punishment-factor`, default 0.4.
    pub punishment_factor: f64,
    /// `url-selector.recovery-period-ms`, default 180000.
    pub recovery_period_ms: u64,
}

impl Default for UrlSelectorConfig {
    fn default() -> Self {
        Self {
            punishment_factor: 0.4,
            recovery_period_ms: 180_000,
        }
    }
}

/// Complete messaging-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// `bounce-proxy-base-url`.
    pub bounce_proxy_base_url: String,
    /// `own-channel-id`: this node's receiving channel, used both to build
    /// its long-poll receive URL and as the MQTT primary-subscription topic
    /// prefix.
    pub own_channel_id: String,
    /// `broker-url`.
    pub broker_url: String,
    /// `mqtt.*` settings.
    pub mqtt: MqttConfig,
    /// `send-retry-interval-ms`.
    pub send_retry_interval_ms: u64,
    /// `max-attempt-ttl-ms`.
    pub max_attempt_ttl_ms: u64,
    /// `url-selector.*` settings.
    pub url_selector: UrlSelectorConfig,
    /// `worker-pool.size`, default 6.
    pub worker_pool_size: usize,
    /// `routing-table.cleanup-interval-ms`.
    pub routing_table_cleanup_interval_ms: u64,
}

impl PlaneConfig {
    /// A configuration aimed at local development: a bounce proxy and
    /// broker on localhost, short cleanup intervals so test runs don't
    /// accumulate state.
    pub fn development() -> Self {
        Self {
            bounce_proxy_base_url: "http://localhost:8080/bounceproxy".to_string(),
            own_channel_id: "clusterbus".to_string(),
            broker_url: "tcp://localhost:1883".to_string(),
            mqtt: MqttConfig::default(),
            send_retry_interval_ms: 1_000,
            max_attempt_ttl_ms: 10_000,
            url_selector: UrlSelectorConfig::default(),
            worker_pool_size: WorkerPoolSize::default_value().as_usize(),
            routing_table_cleanup_interval_ms: 30_000,
        }
    }

    /// A configuration aimed at production deployment: longer cleanup
    /// intervals, a larger worker pool.
    pub fn production() -> Self {
        Self {
            worker_pool_size: 16,
            routing_table_cleanup_interval_ms: 300_000,
            max_attempt_ttl_ms: 20_000,
            ..Self::development()
        }
    }

    /// Validates cross-field consistency beyond what individual newtypes enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on the first failing rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bounce_proxy_base_url.is_empty() {
            return Err(ConfigError::Validation {
                field: "bounce_proxy_base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.broker_url.is_empty() {
            return Err(ConfigError::Validation {
                field: "broker_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.own_channel_id.is_empty() {
            return Err(ConfigError::Validation {
                field: "own_channel_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.url_selector.punishment_factor)
            || self.url_selector.punishment_factor <= 0.0
        {
            return Err(ConfigError::Validation {
                field: "url_selector.punishment_factor".to_string(),
                reason: "must lie in (0, 1)".to_string(),
            });
        }
        if self.max_attempt_ttl_ms <= self.send_retry_interval_ms {
            return Err(ConfigError::Validation {
                field: "max_attempt_ttl_ms".to_string(),
                reason: "must exceed send_retry_interval_ms or every retry would immediately re-timeout"
                    .to_string(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Validation {
                field: "worker_pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0..=2).contains(&self.mqtt.qos) {
            return Err(ConfigError::Validation {
                field: "mqtt.qos".to_string(),
                reason: "must be 0, 1, or 2".to_string(),
            });
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Serialization`] if it is not valid JSON, or
    /// [`ConfigError::Validation`] if it fails [`Self::validate`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes this configuration to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialization`] or [`ConfigError::Io`] on failure.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The punishment factor as a validated newtype.
    ///
    /// # Panics
    ///
    /// Panics if the stored value fails [`PunishmentFactor`]'s validation;
    /// callers should run [`Self::validate`] first, which checks this exact
    /// constraint.
    pub fn punishment_factor(&self) -> PunishmentFactor {
        PunishmentFactor::try_new(self.url_selector.punishment_factor)
            .expect("validate() already checked this is within (0, 1)")
    }

    /// The recovery period as a validated newtype.
    pub fn recovery_period(&self) -> RecoveryPeriodMs {
        RecoveryPeriodMs::try_new(self.url_selector.recovery_period_ms)
            .unwrap_or_else(|_| RecoveryPeriodMs::default_value())
    }

    /// The send-retry interval as a validated newtype.
    pub fn send_retry_interval(&self) -> MillisDuration {
        MillisDuration::try_new(self.send_retry_interval_ms)
            .unwrap_or_else(|_| MillisDuration::try_new(1000).expect("1000 is positive"))
    }

    /// The max per-attempt TTL as a validated newtype.
    pub fn max_attempt_ttl(&self) -> MillisDuration {
        MillisDuration::try_new(self.max_attempt_ttl_ms)
            .unwrap_or_else(|_| MillisDuration::try_new(10_000).expect("10000 is positive"))
    }

    /// The worker-pool size as a validated newtype.
    pub fn worker_pool_size(&self) -> WorkerPoolSize {
        WorkerPoolSize::try_new(self.worker_pool_size).unwrap_or_else(|_| WorkerPoolSize::default_value())
    }
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Fluent builder over [`PlaneConfig`], mirroring the teacher's
/// `RouterConfigBuilder` convention.
#[derive(Debug, Clone, Default)]
pub struct PlaneConfigBuilder {
    config: PlaneConfig,
}

impl PlaneConfigBuilder {
    /// Starts from [`PlaneConfig::development`].
    pub fn new() -> Self {
        Self {
            config: PlaneConfig::development(),
        }
    }

    /// Sets the bounce-proxy base URL.
    pub fn bounce_proxy_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.bounce_proxy_base_url = url.into();
        self
    }

    /// Sets the MQTT broker URL.
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    /// Sets this node's own receiving channel id.
    pub fn own_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.config.own_channel_id = channel_id.into();
        self
    }

    /// Sets the worker-pool size.
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// Sets the send-retry interval in milliseconds.
    pub fn send_retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.send_retry_interval_ms = ms;
        self
    }

    /// Sets the maximum per-attempt TTL in milliseconds.
    pub fn max_attempt_ttl_ms(mut self, ms: u64) -> Self {
        self.config.max_attempt_ttl_ms = ms;
        self
    }

    /// Validates and returns the built configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any field is inconsistent.
    pub fn build(self) -> Result<PlaneConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn development_preset_validates() {
        assert!(PlaneConfig::development().validate().is_ok());
    }

    #[test]
    fn production_preset_validates() {
        assert!(PlaneConfig::production().validate().is_ok());
    }

    #[test]
    fn zero_worker_pool_is_rejected() {
        let mut config = PlaneConfig::development();
        config.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_interval_must_be_below_max_attempt_ttl() {
        let mut config = PlaneConfig::development();
        config.send_retry_interval_ms = config.max_attempt_ttl_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_produces_validated_config() {
        let config = PlaneConfigBuilder::new()
            .bounce_proxy_base_url("http://example/bp")
            .worker_pool_size(4)
            .build()
            .unwrap();
        assert_eq!(config.worker_pool_size, 4);
    }

    #[test]
    fn round_trips_through_file() {
        let config = PlaneConfig::development();
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = PlaneConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.bounce_proxy_base_url, config.bounce_proxy_base_url);
    }

    #[test]
    fn invalid_qos_is_rejected() {
        let mut config = PlaneConfig::development();
        config.mqtt.qos = 5;
        assert!(config.validate().is_err());
    }
}
