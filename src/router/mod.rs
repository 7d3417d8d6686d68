//! The message router / dispatcher: routing table, reply-caller directory,
//! the outbound send pipeline, and inbound dispatch. See the crate-level
//! module docs for how this composes with the directory, scheduler, URL
//! selector, and transport drivers.

mod dispatcher;
mod reply_caller;
mod routing_table;
mod traits;

pub use dispatcher::{MessageRouter, UnknownDestinationPolicy};
pub use reply_caller::{ReplyCaller, ReplyCallerDirectory, ReplyOutcome, new_reply_caller_directory};
pub use routing_table::{RoutingEntry, RoutingTable, RoutingTableError};
pub use traits::{LocalHandler, RouterError};
