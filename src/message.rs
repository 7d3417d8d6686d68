//! The transport-independent message carrier and the address sum type.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain_types::{ChannelId, MessageId};

/// Header name for the negotiated payload serialization format.
pub const HEADER_CONTENT_TYPE: &str = "content-type";
/// Header name for the message's unique id.
pub const HEADER_MESSAGE_ID: &str = "message-id";
/// Header name for the destination participant id.
pub const HEADER_TO: &str = "to";
/// Header name for the originating participant id.
pub const HEADER_FROM: &str = "from";
/// Header name for the absolute expiry timestamp, in ms since epoch.
pub const HEADER_EXPIRY_DATE: &str = "expiry-date";
/// Header name for the channel id a reply should be sent to.
pub const HEADER_REPLY_CHANNEL_ID: &str = "reply-channel-id";
/// Header name for the request/reply correlation id a reply carries.
pub const HEADER_REQUEST_REPLY_ID: &str = "request-reply-id";

/// The kind of a [`Message`], per the wire-level message types of the original protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Fire-and-forget, no reply expected.
    OneWay,
    /// Expects a `Reply` carrying the same request-reply id.
    Request,
    /// Carries the `request-reply-id` of the originating request.
    Reply,
    /// Establishes a subscription; expects a `SubscriptionReply`.
    SubscriptionRequest,
    /// Acknowledges a subscription request.
    SubscriptionReply,
    /// An asynchronous publication delivered to subscribers.
    Publication,
    /// Cancels a previously established selective subscription.
    SubscriptionStop,
}

/// Transport-independent message carrier.
///
/// Invariant: a `Request`/`SubscriptionRequest` carries a `reply-channel-id` header;
/// a `Reply` carries the `request-reply-id` of the originating request. These
/// invariants are enforced by the smart constructors rather than checked ad hoc
/// at every call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    r#type: MessageType,
    header: HashMap<String, String>,
    payload: Vec<u8>,
}

/// Error returned when constructing a [`Message`] whose invariants are violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    /// A `Request`/`SubscriptionRequest` was built without a reply-channel-id.
    #[error("request-like message requires a reply-channel-id header")]
    MissingReplyChannelId,
    /// A message is missing its required `message-id` header at read time.
    #[error("message is missing a message-id header")]
    MissingMessageId,
    /// A message is missing its required `expiry-date` header at read time.
    #[error("message is missing an expiry-date header")]
    MissingExpiryDate,
    /// The `expiry-date` header did not parse as an integer timestamp.
    #[error("expiry-date header is not a valid timestamp: {0}")]
    InvalidExpiryDate(String),
}

impl Message {
    /// Builds a message of the given type, generating a `message-id` if the
    /// caller did not already set one and stamping the remaining headers.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::MissingReplyChannelId`] if `r#type` is
    /// `Request` or `SubscriptionRequest` and `reply_channel_id` is `None`.
    pub fn new(
        r#type: MessageType,
        to: impl Into<String>,
        from: impl Into<String>,
        expiry_date_ms: u64,
        reply_channel_id: Option<ChannelId>,
        payload: Vec<u8>,
    ) -> Result<Self, MessageError> {
        let requires_reply_to = matches!(
            r#type,
            MessageType::Request | MessageType::SubscriptionRequest
        );
        if requires_reply_to && reply_channel_id.is_none() {
            return Err(MessageError::MissingReplyChannelId);
        }

        let mut header = HashMap::new();
        header.insert(HEADER_MESSAGE_ID.to_string(), MessageId::generate().to_string());
        header.insert(HEADER_TO.to_string(), to.into());
        header.insert(HEADER_FROM.to_string(), from.into());
        header.insert(HEADER_EXPIRY_DATE.to_string(), expiry_date_ms.to_string());
        if let Some(channel) = reply_channel_id {
            header.insert(HEADER_REPLY_CHANNEL_ID.to_string(), channel.to_string());
        }

        Ok(Self {
            r#type,
            header,
            payload,
        })
    }

    /// The message's type.
    pub fn message_type(&self) -> MessageType {
        self.r#type
    }

    /// Reads a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header.get(name).map(String::as_str)
    }

    /// Sets or overwrites a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.header.insert(name.into(), value.into());
    }

    /// The opaque payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The destination participant id, if present.
    pub fn to(&self) -> Option<&str> {
        self.header(HEADER_TO)
    }

    /// The originating participant id, if present.
    pub fn from(&self) -> Option<&str> {
        self.header(HEADER_FROM)
    }

    /// The message id, generating and caching one if absent.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::MissingMessageId`] if no id has ever been set,
    /// which cannot happen for messages built via [`Message::new`].
    pub fn message_id(&self) -> Result<&str, MessageError> {
        self.header(HEADER_MESSAGE_ID)
            .ok_or(MessageError::MissingMessageId)
    }

    /// Absolute expiry timestamp in milliseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is absent or not a valid integer.
    pub fn expiry_date_ms(&self) -> Result<u64, MessageError> {
        let raw = self
            .header(HEADER_EXPIRY_DATE)
            .ok_or(MessageError::MissingExpiryDate)?;
        raw.parse()
            .map_err(|_| MessageError::InvalidExpiryDate(raw.to_string()))
    }

    /// Whether the message's TTL has elapsed as of `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiry header is absent or malformed.
    pub fn is_expired_at(&self, now_ms: u64) -> Result<bool, MessageError> {
        Ok(self.expiry_date_ms()? <= now_ms)
    }

    /// Whether the message's TTL has elapsed, judged against the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiry header is absent or malformed.
    pub fn is_expired(&self) -> Result<bool, MessageError> {
        self.is_expired_at(now_ms())
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

/// Sum type over the transport variants a routing-table entry may point at.
///
/// Address identity is structural equality of all fields, matching the
/// original design's "connector" polymorphism: the sender dispatches on the
/// variant tag rather than an inheritance hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    /// An HTTP bounce-proxy channel mailbox.
    Channel {
        /// Base URL of the bounce-proxy serving this channel.
        messaging_endpoint_url: String,
        /// The channel's id.
        channel_id: String,
    },
    /// An MQTT broker topic.
    Mqtt {
        /// URL of the MQTT broker.
        broker_url: String,
        /// Topic to publish to.
        topic: String,
    },
    /// A handler living in this same process; never crosses a transport.
    InProcess {
        /// Opaque reference naming the local handler.
        handler_id: String,
    },
}
