//! The one-shot completion handle for an outstanding request, and the
//! TTL-eviction hook that turns an unanswered request into a timeout.
//!
//! Grounded on `joynr::IReplyCaller` and the `RemoverRunnable<Key,
//! IReplyCaller>` template specialization in
//! common/include/joynr/Directory.h, which calls `value->timeOut()` before
//! removing an expired entry — the mechanism by which timeouts reach
//! proxies without a dedicated timer wheel (see design notes).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;

use crate::directory::{Directory, EvictionHook};
use crate::domain_types::RequestReplyId;

/// Outcome delivered to a [`ReplyCaller`]'s waiter.
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// The matching reply arrived in time, carrying its raw payload.
    Success(Vec<u8>),
    /// The request's TTL elapsed before a reply arrived.
    Timeout,
}

/// A one-shot completion handle for an outstanding request.
///
/// Firing twice must not occur: the directory removes the entry before
/// invoking the hook, and [`Self::complete`] consumes `self`, so at most one
/// of "a reply arrived" or "the TTL eviction hook fired" can ever run for a
/// given instance.
pub struct ReplyCaller {
    sender: std::sync::Mutex<Option<oneshot::Sender<ReplyOutcome>>>,
    fired: AtomicBool,
}

impl ReplyCaller {
    /// Creates a caller and the receiver a proxy awaits for its outcome.
    pub fn new() -> (Self, oneshot::Receiver<ReplyOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: std::sync::Mutex::new(Some(sender)),
                fired: AtomicBool::new(false),
            },
            receiver,
        )
    }

    /// Delivers `outcome` to the waiting proxy. A no-op if already fired.
    pub fn complete(&self, outcome: ReplyOutcome) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sender) = self.sender.lock().expect("reply caller mutex poisoned").take() {
            let _ = sender.send(outcome);
        }
    }
}

/// Eviction hook wired into the reply-caller directory: on TTL expiry,
/// invokes `onError(Timeout)` on the evicted caller.
pub struct TimeoutHook;

impl EvictionHook<Arc<ReplyCaller>> for TimeoutHook {
    fn on_evict(&self, value: Arc<ReplyCaller>) {
        value.complete(ReplyOutcome::Timeout);
    }
}

/// The reply-caller directory: correlation id -> outstanding `ReplyCaller`,
/// with the timeout-firing eviction hook installed.
pub type ReplyCallerDirectory = Directory<RequestReplyId, Arc<ReplyCaller>, TimeoutHook>;

/// Builds a fresh, empty reply-caller directory.
pub fn new_reply_caller_directory() -> ReplyCallerDirectory {
    Directory::with_hook(TimeoutHook)
}
