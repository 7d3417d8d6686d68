//! HTTP long-poll bounce-proxy driver.
//!
//! URL construction is grounded on `joynr::BounceProxyUrl`
//! (cluster-communication-manager/BounceProxyUrl.cpp): bit-exact paths for
//! create/send/delete/time-check, with base-URL trailing-slash
//! normalization in the constructor. Send-path retry/backoff is grounded on
//! `joynr::HttpSender` / `SendMessageRunnable`
//! (http-communication-manager/HttpSender.cpp): `MIN_ATTEMPT_TTL = 2s`,
//! `FRACTION_OF_MESSAGE_TTL_USED_PER_CONNECTION_TRIAL = 3`, and the
//! documented behavior that an expired message is dropped silently rather
//! than reported as a failure (see the design notes' open question: this is
//! preserved intentionally, not a bug to fix).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain_types::MillisDuration;
use crate::message::Address;
use crate::scheduler::{SingleThreadedDelayedScheduler, Task};
use crate::url_selector::{strip_message_path_suffix, UrlSelector};

/// Minimum per-attempt timeout, regardless of remaining TTL.
pub const MIN_ATTEMPT_TTL: Duration = Duration::from_secs(2);
/// Divides the remaining TTL to compute a per-attempt timeout budget.
pub const FRACTION_OF_MESSAGE_TTL_PER_TRIAL: u32 = 3;
/// HTTP status code the bounce proxy returns on a successful send.
pub const SUCCESS_STATUS: u16 = 201;

/// Errors the HTTP driver's send path can surface. Per the design, only
/// decay (which becomes a `Timeout` at the router) is ever visible to a
/// caller; everything else is absorbed into the retry loop and logged.
#[derive(Debug, Error)]
pub enum HttpDriverError {
    /// The message's decay time had already passed when the driver attempted to send it.
    #[error("message decayed before it could be sent")]
    Decayed,
    /// The channel address did not carry an HTTP endpoint.
    #[error("address is not an HTTP channel address")]
    NotAChannelAddress,
}

/// Bit-exact bounce-proxy URL builder.
#[derive(Debug, Clone)]
pub struct BounceProxyUrl {
    base: String,
}

impl BounceProxyUrl {
    /// Builds a URL helper over `base`, normalizing away a trailing slash so
    /// that `"http://host/bp"` and `"http://host/bp/"` produce identical
    /// output (the spec's stated idempotence property).
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let trimmed = base.trim_end_matches('/').to_string();
        Self { base: trimmed }
    }

    /// `<base>/channels/?ccid=<channel_id>`
    pub fn create_channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/?ccid={channel_id}", self.base)
    }

    /// `<base>/channels/<channel_id>/message/`
    pub fn send_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}/message/", self.base)
    }

    /// `<base>/channels/<channel_id>/`
    pub fn delete_channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}/", self.base)
    }

    /// `<base>/time/`
    pub fn time_check_url(&self) -> String {
        format!("{}/time/", self.base)
    }
}

/// HTTP long-poll bounce-proxy driver.
pub struct HttpDriver {
    client: Client,
    url_selector: Arc<UrlSelector>,
    scheduler: Arc<SingleThreadedDelayedScheduler>,
    send_retry_interval: MillisDuration,
    max_attempt_ttl: MillisDuration,
}

impl HttpDriver {
    /// Builds a driver that retries sends via `scheduler` and ranks
    /// endpoints via `url_selector`.
    pub fn new(
        url_selector: Arc<UrlSelector>,
        scheduler: Arc<SingleThreadedDelayedScheduler>,
        send_retry_interval: MillisDuration,
        max_attempt_ttl: MillisDuration,
    ) -> Self {
        Self {
            client: Client::new(),
            url_selector,
            scheduler,
            send_retry_interval,
            max_attempt_ttl,
        }
    }

    /// Attempts one send to `channel_id`, returning the HTTP status on
    /// completion or an error for a connection-level failure. Neither
    /// outcome is surfaced to the caller of [`Self::send_message`]; it only
    /// drives the retry decision.
    async fn attempt(
        &self,
        channel_id: &str,
        bytes: &[u8],
        remaining_ttl: Duration,
    ) -> Result<u16, reqwest::Error> {
        let base_url = self
            .url_selector
            .obtain_url(channel_id)
            .await
            .unwrap_or_else(|_| String::new());
        let send_url = format!("{}message/", base_url.trim_end_matches("message/"));

        let per_attempt = (remaining_ttl / FRACTION_OF_MESSAGE_TTL_PER_TRIAL).max(MIN_ATTEMPT_TTL);
        let timeout = per_attempt.min(self.max_attempt_ttl.as_duration());

        let response = match self
            .client
            .post(&send_url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(bytes.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                self.url_selector
                    .feedback(false, channel_id, strip_message_path_suffix(&send_url))
                    .await;
                return Err(error);
            }
        };

        let status = response.status().as_u16();
        if status != SUCCESS_STATUS {
            self.url_selector
                .feedback(false, channel_id, strip_message_path_suffix(&send_url))
                .await;
        }
        Ok(status)
    }

    /// Drives the send-with-retry loop for one message. Spawns reschedules
    /// through the scheduler rather than looping inline, so a slow retry
    /// chain never blocks the worker that submitted the original send.
    pub async fn send_message(
        self: &Arc<Self>,
        destination: &Address,
        bytes: Vec<u8>,
        decay_time: Instant,
    ) -> Result<(), HttpDriverError> {
        let channel_id = match destination {
            Address::Channel { channel_id, .. } => channel_id.clone(),
            _ => return Err(HttpDriverError::NotAChannelAddress),
        };
        self.send_with_retry(channel_id, bytes, decay_time).await;
        Ok(())
    }

    async fn send_with_retry(self: &Arc<Self>, channel_id: String, bytes: Vec<u8>, decay_time: Instant) {
        if Instant::now() > decay_time {
            debug!(channel_id, "message expired before send attempt, dropping");
            return;
        }

        let remaining_ttl = decay_time.saturating_duration_since(Instant::now());
        let started = Instant::now();
        match self.attempt(&channel_id, &bytes, remaining_ttl).await {
            Ok(status) if status == SUCCESS_STATUS => {
                debug!(channel_id, "send succeeded");
            }
            Ok(status) => {
                warn!(channel_id, status, "send failed, scheduling retry");
                self.reschedule(channel_id, bytes, decay_time, started).await;
            }
            Err(error) => {
                warn!(channel_id, %error, "send transport error, scheduling retry");
                self.reschedule(channel_id, bytes, decay_time, started).await;
            }
        }
    }

    async fn reschedule(self: &Arc<Self>, channel_id: String, bytes: Vec<u8>, decay_time: Instant, attempt_started: Instant) {
        let elapsed = attempt_started.elapsed();
        let delay = self
            .send_retry_interval
            .as_duration()
            .saturating_sub(elapsed)
            .max(Duration::from_millis(10));

        let driver = Arc::clone(self);
        let task: Task = Box::pin(async move {
            driver.send_with_retry(channel_id, bytes, decay_time).await;
        });
        if self.scheduler.schedule(task, delay).is_err() {
            warn!("could not reschedule send: scheduler is shut down");
        }
    }
}

/// Long-poll inbound reader: repeatedly GETs a channel's mailbox and hands
/// every returned message to `sink`. Reconnects with bounded backoff on
/// connection loss, per the receive-path contract in the design.
pub struct LongPollReader<S> {
    client: Client,
    channel_url: String,
    sink: Arc<S>,
}

#[async_trait]
pub trait LongPollSink: Send + Sync {
    /// Delivers one raw message body received from the long-poll GET.
    async fn on_message(&self, channel_id: &str, bytes: Vec<u8>);
}

impl<S> LongPollReader<S>
where
    S: LongPollSink + 'static,
{
    /// Builds a reader polling `channel_url` and delivering to `sink`.
    pub fn new(channel_url: impl Into<String>, sink: Arc<S>) -> Self {
        Self {
            client: Client::new(),
            channel_url: channel_url.into(),
            sink,
        }
    }

    /// Runs the long-poll loop until `shutdown` is notified.
    pub async fn run(&self, channel_id: &str, shutdown: Arc<tokio::sync::Notify>) {
        let mut backoff = Duration::from_millis(100);
        loop {
            tokio::select! {
                _ = shutdown.notified() => return,
                result = self.client.get(&self.channel_url).timeout(Duration::from_secs(60)).send() => {
                    match result {
                        Ok(response) => {
                            backoff = Duration::from_millis(100);
                            if let Ok(bytes) = response.bytes().await {
                                self.sink.on_message(channel_id, bytes.to_vec()).await;
                            }
                        }
                        Err(error) => {
                            warn!(%error, "long-poll GET failed, backing off");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(Duration::from_secs(30));
                        }
                    }
                }
            }
        }
    }
}
