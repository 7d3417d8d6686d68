//! Domain types for the clusterbus messaging plane
//!
//! Strongly-typed values that prevent primitive obsession at the boundaries
//! between components: routing-table keys, reply correlation ids, and the
//! handful of tunable numeric parameters the spec calls out by name.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a proxy or provider participant; the routing table's key type.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ParticipantId(String);

/// Identifier for a bounce-proxy / MQTT channel mailbox.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ChannelId(String);

/// Unique identifier for a single message, generated if absent on emit.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random message id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Correlation key shared by a request and its reply.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct RequestReplyId(Uuid);

impl RequestReplyId {
    /// Generates a fresh random correlation id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier for a multicast subscription (fans out to many subscribers).
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct MulticastId(String);

/// URL-selector punishment factor applied on negative feedback; must lie in `(0, 1)`.
#[nutype(
    validate(greater = 0.0, less = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Into, TryFrom),
)]
pub struct PunishmentFactor(f64);

impl PunishmentFactor {
    /// The value used throughout the joynr-derived fitness math: 0.4.
    pub fn default_value() -> Self {
        Self::try_new(0.4).expect("0.4 is within (0, 1)")
    }

    /// Returns the raw factor.
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Recovery period `T` for URL-selector fitness decay recovery, in milliseconds.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into, TryFrom),
)]
pub struct RecoveryPeriodMs(u64);

impl RecoveryPeriodMs {
    /// Three minutes, the value used by the source implementation.
    pub fn default_value() -> Self {
        Self::try_new(180_000).expect("180000 is positive")
    }

    /// Returns the period as a [`std::time::Duration`].
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Number of workers in the `SendTask` execution pool.
#[nutype(
    validate(greater = 0, less_or_equal = 256),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into, TryFrom),
)]
pub struct WorkerPoolSize(usize);

impl WorkerPoolSize {
    /// The spec's documented default of 6 workers.
    pub fn default_value() -> Self {
        Self::try_new(6).expect("6 is within bounds")
    }

    /// Returns the size as a plain `usize`.
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// A millisecond duration used for retry intervals and TTL-like configuration knobs.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into, TryFrom),
)]
pub struct MillisDuration(u64);

impl MillisDuration {
    /// Returns the duration as a [`std::time::Duration`].
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }

    /// Returns the raw millisecond count.
    pub fn as_millis(&self) -> u64 {
        self.into_inner()
    }
}

/// MQTT quality of service level; restricted to the three valid values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttQos {
    /// At most once.
    AtMostOnce = 0,
    /// At least once; the spec's default.
    AtLeastOnce = 1,
    /// Exactly once.
    ExactlyOnce = 2,
}

impl Default for MqttQos {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}
