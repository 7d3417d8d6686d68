//! The participant-id -> address routing table shared by outbound lookup
//! and inbound dispatch.
//!
//! Grounded on the routing-table lookup in `joynr::MessageRouter::route`
//! (cluster-controller/messaging/MessageRouter.cpp), generalized with the
//! alias-conflict and sticky/expiry bookkeeping the design calls for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::message::Address;

/// One routing-table binding.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    /// Where to send messages addressed to this participant.
    pub address: Address,
    /// Whether this participant's address may be advertised externally.
    pub is_globally_visible: bool,
    /// Absolute expiry; non-sticky entries past this may be reaped.
    pub expiry: Instant,
    /// Sticky entries are never reaped regardless of `expiry`.
    pub sticky: bool,
}

/// Rejection reason when an insert would silently clobber a conflicting binding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingTableError {
    /// A different address is already registered for this id with an
    /// expiry no earlier than the one being inserted.
    #[error("participant {0} already has a conflicting address registered")]
    AliasConflict(String),
}

/// Concurrent participant-id -> [`RoutingEntry`] map.
pub struct RoutingTable {
    entries: Arc<RwLock<HashMap<String, RoutingEntry>>>,
}

impl RoutingTable {
    /// Creates an empty routing table.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Inserts or updates the binding for `participant_id`.
    ///
    /// If an entry already exists for the same id, the new address must
    /// equal the existing one, or the new entry must carry a strictly later
    /// expiry; otherwise the insert is rejected as an alias conflict.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingTableError::AliasConflict`] when neither condition holds.
    pub async fn insert(
        &self,
        participant_id: impl Into<String>,
        entry: RoutingEntry,
    ) -> Result<(), RoutingTableError> {
        let participant_id = participant_id.into();
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&participant_id) {
            let same_address = existing.address == entry.address;
            let later_expiry = entry.expiry > existing.expiry;
            if !same_address && !later_expiry {
                return Err(RoutingTableError::AliasConflict(participant_id));
            }
        }
        entries.insert(participant_id, entry);
        Ok(())
    }

    /// Looks up the binding for `participant_id`.
    pub async fn lookup(&self, participant_id: &str) -> Option<RoutingEntry> {
        self.entries.read().await.get(participant_id).cloned()
    }

    /// Removes non-sticky entries whose expiry has passed as of `now`.
    pub async fn reap_expired(&self, now: Instant) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.sticky || entry.expiry > now);
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the table currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel_address(id: &str) -> Address {
        Address::Channel {
            messaging_endpoint_url: "http://bp.example/channels/".to_string(),
            channel_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_lookup_round_trips() {
        let table = RoutingTable::new();
        table
            .insert(
                "P1",
                RoutingEntry {
                    address: channel_address("C1"),
                    is_globally_visible: true,
                    expiry: Instant::now() + Duration::from_secs(60),
                    sticky: false,
                },
            )
            .await
            .unwrap();
        let entry = table.lookup("P1").await.unwrap();
        assert_eq!(entry.address, channel_address("C1"));
    }

    #[tokio::test]
    async fn conflicting_address_with_earlier_expiry_is_rejected() {
        let table = RoutingTable::new();
        let later = Instant::now() + Duration::from_secs(120);
        table
            .insert(
                "P1",
                RoutingEntry {
                    address: channel_address("C1"),
                    is_globally_visible: true,
                    expiry: later,
                    sticky: false,
                },
            )
            .await
            .unwrap();

        let result = table
            .insert(
                "P1",
                RoutingEntry {
                    address: channel_address("C2"),
                    is_globally_visible: true,
                    expiry: Instant::now() + Duration::from_secs(10),
                    sticky: false,
                },
            )
            .await;
        assert_eq!(
            result.unwrap_err(),
            RoutingTableError::AliasConflict("P1".to_string())
        );
    }

    #[tokio::test]
    async fn same_address_with_earlier_expiry_is_accepted() {
        let table = RoutingTable::new();
        table
            .insert(
                "P1",
                RoutingEntry {
                    address: channel_address("C1"),
                    is_globally_visible: true,
                    expiry: Instant::now() + Duration::from_secs(120),
                    sticky: false,
                },
            )
            .await
            .unwrap();
        let result = table
            .insert(
                "P1",
                RoutingEntry {
                    address: channel_address("C1"),
                    is_globally_visible: true,
                    expiry: Instant::now() + Duration::from_secs(5),
                    sticky: false,
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reap_expired_keeps_sticky_entries() {
        let table = RoutingTable::new();
        table
            .insert(
                "sticky",
                RoutingEntry {
                    address: channel_address("C1"),
                    is_globally_visible: true,
                    expiry: Instant::now() - Duration::from_secs(1),
                    sticky: true,
                },
            )
            .await
            .unwrap();
        table
            .insert(
                "expired",
                RoutingEntry {
                    address: channel_address("C2"),
                    is_globally_visible: true,
                    expiry: Instant::now() - Duration::from_secs(1),
                    sticky: false,
                },
            )
            .await
            .unwrap();

        table.reap_expired(Instant::now()).await;
        assert!(table.lookup("sticky").await.is_some());
        assert!(table.lookup("expired").await.is_none());
    }
}
