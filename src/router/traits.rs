//! Router-facing error taxonomy and the local-handler / driver seams the
//! dispatcher dispatches through.
//!
//! Grounded on `joynr::MessageRouter` (cluster-controller/messaging/
//! MessageRouter.cpp) for the route/dispatch contract, and on the teacher
//! crate's `message_router::traits` module for the shape of an
//! error-enum-per-concern plus async trait seam around the router.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Router-level error taxonomy, matching the design's error kinds.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The message's TTL elapsed before a success signal was produced.
    #[error("timed out: {0}")]
    Timeout(String),
    /// A driver-level transport failure that could not be recovered by retrying.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The destination participant id is not present in the routing table.
    #[error("routing failure: no route to participant {0}")]
    Routing(String),
    /// Inbound bytes failed to deserialize, or a required header was missing.
    #[error("serialization failure: {0}")]
    Serialization(String),
    /// The router is shutting down or the driver is in a non-recoverable state.
    #[error("fatal: {0}")]
    Fatal(String),
    /// An insert into the routing table conflicted with an existing entry.
    #[error(transparent)]
    AliasConflict(#[from] super::routing_table::RoutingTableError),
}

/// A locally registered recipient for messages addressed to one participant id.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    /// Delivers one inbound message to this handler.
    async fn handle(&self, message: Message);
}
