//! # clusterbus - cluster-controller message layer
//!
//! A standalone reimplementation of the cluster-controller messaging plane:
//! time-indexed directories with eviction hooks, a delayed-task scheduler,
//! fitness-ranked HTTP bounce-proxy URL selection, HTTP and MQTT transport
//! drivers, and a message router tying them together with a routing table,
//! reply correlation, pending-destination queueing, and multicast
//! subscriptions.
//!
//! ## Architecture
//!
//! Components build on each other in this order: [`directory`] underlies
//! both the routing table and the reply-caller directory; [`scheduler`]
//! drives retries and TTL-bound timeouts; [`url_selector`] ranks bounce-proxy
//! candidate URLs by fitness; [`drivers`] implement the two transports
//! ([`drivers::http`] and [`drivers::mqtt`]); [`router`] composes all of the
//! above into the send/dispatch pipeline.

pub mod config;
pub mod directory;
pub mod domain_types;
pub mod drivers;
pub mod error;
pub mod message;
pub mod observability;
pub mod router;
pub mod scheduler;
pub mod url_selector;

pub use config::{PlaneConfig, PlaneConfigBuilder};
pub use error::PlaneError;
pub use message::{Address, Message, MessageType};
