//! Crate-level error taxonomy.
//!
//! Component errors (`SchedulerError`, `UrlSelectorError`, `HttpDriverError`,
//! `MqttDriverError`, `RouterError`) each live next to the component they
//! describe. `Directory` has no error type of its own — every one of its
//! operations is infallible by construction (lookups return `Option`,
//! inserts always succeed). `PlaneError` unifies the rest for callers that
//! only need the coarse taxonomy from the design: timeout, transport,
//! routing, serialization, fatal.

use thiserror::Error;

use crate::config::ConfigError;
use crate::drivers::http::HttpDriverError;
use crate::drivers::mqtt::MqttDriverError;
use crate::router::RouterError;
use crate::scheduler::SchedulerError;
use crate::url_selector::UrlSelectorError;

/// Top-level error type for the messaging plane.
#[derive(Error, Debug)]
pub enum PlaneError {
    /// A message's TTL elapsed before a success signal arrived.
    #[error("timed out waiting for a reply: {0}")]
    Timeout(String),

    /// A driver-level transport failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A destination participant could not be resolved.
    #[error("routing failure: {0}")]
    Routing(String),

    /// A message failed to serialize or deserialize, or was missing a required header.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// A non-recoverable failure that stops the affected driver.
    #[error("fatal plane error: {0}")]
    Fatal(String),

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Router-level error.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// HTTP driver error.
    #[error(transparent)]
    HttpDriver(#[from] HttpDriverError),

    /// MQTT driver error.
    #[error(transparent)]
    MqttDriver(#[from] MqttDriverError),

    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// URL selector error.
    #[error(transparent)]
    UrlSelector(#[from] UrlSelectorError),
}
