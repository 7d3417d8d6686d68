//! Per-channel URL selection with failure-driven load balancing.
//!
//! Grounded on `joynr::ChannelUrlSelector` / `ChannelUrlSelectorEntry`
//! (cluster-controller/http-communication-manager/ChannelUrlSelector.{h,cpp}).
//! Fitness starts at `N - i` for the URL at index `i`, a punish subtracts
//! `punishmentFactor` from the punished URL's fitness, and idle time
//! recovers fitness at a rate of `punishmentFactor` per `recoveryPeriod`,
//! capped at the URL's initial rank so a demoted URL can never be promoted
//! past where it started.
//!
//! The cache stores URLs in canonical (base) form throughout — see
//! REDESIGN FLAGS in the design notes: the source appends the message-path
//! suffix before caching and strips it again in `feedback`, an
//! inconsistency this implementation avoids by never caching the suffixed
//! form. Appending the suffix is the HTTP driver's job, at the point it
//! builds a send URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain_types::{PunishmentFactor, RecoveryPeriodMs};

/// Errors the URL selector can report.
#[derive(Debug, Error)]
pub enum UrlSelectorError {
    /// No URL could be obtained or synthesized for the channel.
    #[error("no url available for channel {0}")]
    NoUrlAvailable(String),
}

/// Resolves the initial candidate URL list for a channel not yet cached,
/// e.g. a lookup against the discovery/channel-URL-directory subsystem.
/// Left as a narrow external interface per the scope boundary.
#[async_trait::async_trait]
pub trait ChannelUrlDirectory: Send + Sync {
    /// Returns the known candidate URLs for `channel_id`, highest-priority first.
    async fn urls_for_channel(&self, channel_id: &str) -> Vec<String>;
}

/// A directory that never has any URLs cached, forcing every channel onto
/// the synthesized default URL. Useful as a minimal default/test double.
pub struct EmptyChannelUrlDirectory;

#[async_trait::async_trait]
impl ChannelUrlDirectory for EmptyChannelUrlDirectory {
    async fn urls_for_channel(&self, _channel_id: &str) -> Vec<String> {
        Vec::new()
    }
}

struct Entry {
    urls: Vec<String>,
    fitness: Vec<f64>,
    last_update: Instant,
}

impl Entry {
    fn new(urls: Vec<String>) -> Self {
        let n = urls.len();
        let fitness = (0..n).map(|i| (n - i) as f64).collect();
        Self {
            urls,
            fitness,
            last_update: Instant::now(),
        }
    }

    fn ceiling(&self, index: usize) -> f64 {
        (self.urls.len() - index) as f64
    }

    fn recover(&mut self, punishment_factor: f64, recovery_period: Duration) {
        let elapsed = self.last_update.elapsed();
        let increments = (elapsed.as_secs_f64() / recovery_period.as_secs_f64()).floor();
        if increments >= 1.0 {
            let gain = increments * punishment_factor;
            for (i, fitness) in self.fitness.iter_mut().enumerate() {
                let ceiling = (self.urls.len() - i) as f64;
                *fitness = (*fitness + gain).min(ceiling);
            }
            self.last_update = Instant::now();
        }
    }

    fn best(&self) -> &str {
        let mut best_index = 0;
        for i in 1..self.fitness.len() {
            if self.fitness[i] > self.fitness[best_index] {
                best_index = i;
            }
        }
        &self.urls[best_index]
    }

    fn punish(&mut self, url: &str, punishment_factor: f64) {
        if let Some(index) = self.urls.iter().position(|candidate| candidate == url) {
            self.fitness[index] -= punishment_factor;
        }
    }
}

/// Per-channel fitness-ranked URL selector.
pub struct UrlSelector {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    directory: Arc<dyn ChannelUrlDirectory>,
    bounce_proxy_base_url: String,
    punishment_factor: PunishmentFactor,
    recovery_period: RecoveryPeriodMs,
}

impl UrlSelector {
    /// Creates a selector backed by `directory` for cache misses, falling
    /// back to a URL synthesized from `bounce_proxy_base_url` when the
    /// directory has nothing for a channel.
    pub fn new(
        directory: Arc<dyn ChannelUrlDirectory>,
        bounce_proxy_base_url: impl Into<String>,
        punishment_factor: PunishmentFactor,
        recovery_period: RecoveryPeriodMs,
    ) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            directory,
            bounce_proxy_base_url: bounce_proxy_base_url.into(),
            punishment_factor,
            recovery_period,
        }
    }

    fn default_url_for(&self, channel_id: &str) -> String {
        let base = self.bounce_proxy_base_url.trim_end_matches('/');
        format!("{base}/channels/{channel_id}/")
    }

    /// Returns the current best (canonical, base-form) URL for `channel_id`,
    /// populating the cache from the channel-URL directory (or a synthesized
    /// default) on first use.
    ///
    /// # Errors
    ///
    /// Never actually fails in the current implementation — a channel with
    /// no known URLs still gets a synthesized default — but the signature
    /// stays fallible for the hypothetical case of an empty default.
    pub async fn obtain_url(&self, channel_id: &str) -> Result<String, UrlSelectorError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(channel_id) {
            let mut urls = self.directory.urls_for_channel(channel_id).await;
            if urls.is_empty() {
                urls.push(self.default_url_for(channel_id));
            }
            entries.insert(channel_id.to_string(), Entry::new(urls));
        }
        let entry = entries.get_mut(channel_id).expect("just inserted");
        entry.recover(self.punishment_factor.as_f64(), self.recovery_period.as_duration());
        if entry.urls.is_empty() {
            return Err(UrlSelectorError::NoUrlAvailable(channel_id.to_string()));
        }
        Ok(entry.best().to_string())
    }

    /// Reports the outcome of a send attempt against `url` for `channel_id`.
    /// A success is a no-op; a failure demotes `url`'s fitness by the
    /// punishment factor. `url` may be given in suffixed or base form; it is
    /// normalized to base form before lookup, and a `url` absent from the
    /// channel's list is silently ignored.
    pub async fn feedback(&self, success: bool, channel_id: &str, url: &str) {
        if success {
            return;
        }
        let base_url = strip_message_path_suffix(url);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(channel_id) {
            entry.recover(self.punishment_factor.as_f64(), self.recovery_period.as_duration());
            entry.punish(base_url, self.punishment_factor.as_f64());
        }
    }

    /// Returns the current fitness vector for a channel, for diagnostics and tests.
    pub async fn fitness_snapshot(&self, channel_id: &str) -> Option<Vec<f64>> {
        self.entries
            .lock()
            .await
            .get(channel_id)
            .map(|entry| entry.fitness.clone())
    }

    /// Returns the ceiling (initial rank) fitness for the URL at `index` in `channel_id`'s list.
    pub async fn fitness_ceiling(&self, channel_id: &str, index: usize) -> Option<f64> {
        self.entries
            .lock()
            .await
            .get(channel_id)
            .map(|entry| entry.ceiling(index))
    }
}

/// Strips the trailing message-path suffix (`message/`) from a send URL,
/// returning the canonical base form used as the cache key.
pub fn strip_message_path_suffix(url: &str) -> &str {
    url.strip_suffix("message/").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with_three_urls() -> (UrlSelector, &'static str) {
        struct FixedDirectory(Vec<String>);
        #[async_trait::async_trait]
        impl ChannelUrlDirectory for FixedDirectory {
            async fn urls_for_channel(&self, _channel_id: &str) -> Vec<String> {
                self.0.clone()
            }
        }
        let directory = Arc::new(FixedDirectory(vec![
            "http://first/".to_string(),
            "http://second/".to_string(),
            "http://third/".to_string(),
        ]));
        let selector = UrlSelector::new(
            directory,
            "http://bounceproxy",
            PunishmentFactor::default_value(),
            RecoveryPeriodMs::try_new(180_000_000).unwrap(),
        );
        (selector, "C1")
    }

    #[tokio::test]
    async fn initial_fitness_matches_spec() {
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        let fitness = selector.fitness_snapshot(channel).await.unwrap();
        assert_eq!(fitness, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn one_punish_matches_spec_numbers() {
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        selector.feedback(false, channel, "http://first/").await;
        let fitness = selector.fitness_snapshot(channel).await.unwrap();
        assert!((fitness[0] - 2.6).abs() < 1e-9);
        assert_eq!(fitness[1], 2.0);
        assert_eq!(fitness[2], 1.0);
        assert_eq!(selector.obtain_url(channel).await.unwrap(), "http://first/");
    }

    #[tokio::test]
    async fn three_punishes_demote_first_url() {
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        for _ in 0..3 {
            selector.feedback(false, channel, "http://first/").await;
        }
        assert_eq!(selector.obtain_url(channel).await.unwrap(), "http://second/");
    }

    #[tokio::test]
    async fn fitness_never_exceeds_ceiling() {
        // A huge elapsed time should saturate fitness at the ceiling, not beyond.
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        {
            let mut entries = selector.entries.lock().await;
            let entry = entries.get_mut(channel).unwrap();
            entry.last_update = Instant::now() - Duration::from_secs(3600 * 24 * 365);
        }
        selector.obtain_url(channel).await.unwrap();
        let fitness = selector.fitness_snapshot(channel).await.unwrap();
        assert_eq!(fitness, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn feedback_accepts_suffixed_url() {
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        selector.feedback(false, channel, "http://first/message/").await;
        let fitness = selector.fitness_snapshot(channel).await.unwrap();
        assert!((fitness[0] - 2.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn feedback_on_unknown_url_is_ignored() {
        let (selector, channel) = selector_with_three_urls();
        selector.obtain_url(channel).await.unwrap();
        selector.feedback(false, channel, "http://not-in-list/").await;
        let fitness = selector.fitness_snapshot(channel).await.unwrap();
        assert_eq!(fitness, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn empty_directory_synthesizes_default_url() {
        let selector = UrlSelector::new(
            Arc::new(EmptyChannelUrlDirectory),
            "http://localhost:8080/bounceproxy/",
            PunishmentFactor::default_value(),
            RecoveryPeriodMs::default_value(),
        );
        let url = selector.obtain_url("C1").await.unwrap();
        assert_eq!(url, "http://localhost:8080/bounceproxy/channels/C1/");
    }
}
