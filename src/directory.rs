//! Time-indexed directory: a concurrent `K -> V` map where entries may carry
//! a TTL that, on expiry, removes the entry and invokes an eviction hook.
//!
//! Grounded on `joynr::Directory<Key, T>` (common/include/joynr/Directory.h):
//! a mutex-guarded map plus one scheduled removal per TTL-bearing entry, and
//! a `RemoverRunnable` that is specialized for `IReplyCaller` to call
//! `timeOut()` before removing. Here the specialization is expressed as a
//! pluggable `EvictionHook<V>` rather than a template specialization, since
//! Rust has no partial specialization to exploit.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Runs when a TTL-bearing entry expires before being looked up or removed.
///
/// Hooks must not assume the directory's internal lock is held while they
/// run — the original implementation calls this out explicitly as a
/// deadlock hazard, since a hook may re-enter the same directory.
pub trait EvictionHook<V>: Send + Sync + 'static {
    /// Called with the evicted value, outside the directory's lock.
    fn on_evict(&self, value: V);
}

/// An eviction hook that does nothing; the default for plain directories.
pub struct DropHook;

impl<V> EvictionHook<V> for DropHook {
    fn on_evict(&self, _value: V) {}
}

struct Entry<V> {
    value: V,
    timer: Option<JoinHandle<()>>,
}

/// A concurrent, optionally-TTL'd map from `K` to `V`.
pub struct Directory<K, V, H = DropHook>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    H: EvictionHook<V>,
{
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    hook: Arc<H>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl<K, V, H> Directory<K, V, H>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    H: EvictionHook<V>,
{
    /// Creates a directory that runs `hook` on every TTL-driven eviction.
    pub fn with_hook(hook: H) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            hook: Arc::new(hook),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Inserts `value` under `key` with no expiry, overwriting any existing binding.
    pub async fn add(&self, key: K, value: V) {
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.insert(key, Entry { value, timer: None }) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }
    }

    /// Inserts `value` under `key`, scheduling removal after `ttl`. Any
    /// previous timer for `key` is cancelled before the new one is armed, so
    /// a re-insert never produces a duplicate eviction.
    pub async fn add_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if self.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let entries_for_timer = Arc::clone(&self.entries);
        let hook = Arc::clone(&self.hook);
        let key_for_timer = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let evicted = {
                let mut entries = entries_for_timer.lock().await;
                entries.remove(&key_for_timer)
            };
            if let Some(entry) = evicted {
                hook.on_evict(entry.value);
            }
        });

        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.insert(
            key,
            Entry {
                value,
                timer: Some(timer),
            },
        ) {
            if let Some(previous_timer) = previous.timer {
                previous_timer.abort();
            }
        }
    }

    /// Returns a clone of the current binding for `key`, if any.
    pub async fn lookup(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().await;
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Atomically looks up and removes the binding for `key`.
    pub async fn take(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        entries.remove(key).map(|entry| {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry.value
        })
    }

    /// Whether `key` currently has a binding.
    pub async fn contains(&self, key: &K) -> bool {
        let entries = self.entries.lock().await;
        entries.contains_key(key)
    }

    /// Removes the binding for `key`, if any, cancelling its timer.
    pub async fn remove(&self, key: &K) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.remove(key) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    /// Cancels every pending expiry. Subsequent calls to [`Self::add_with_ttl`]
    /// become no-ops; plain [`Self::add`] still works.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.iter_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    /// Number of entries currently held, including those awaiting eviction.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the directory currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Returns a cheap handle sharing this directory's state.
    pub fn clone_handle(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            hook: Arc::clone(&self.hook),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<K, V> Default for Directory<K, V, DropHook>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_hook(DropHook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        count: Arc<AtomicUsize>,
    }

    impl EvictionHook<i32> for CountingHook {
        fn on_evict(&self, _value: i32) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn lookup_returns_inserted_value() {
        let dir: Directory<String, i32> = Directory::default();
        dir.add("k".to_string(), 42).await;
        assert_eq!(dir.lookup(&"k".to_string()).await, Some(42));
    }

    #[tokio::test]
    async fn take_removes_entry() {
        let dir: Directory<String, i32> = Directory::default();
        dir.add("k".to_string(), 42).await;
        assert_eq!(dir.take(&"k".to_string()).await, Some(42));
        assert!(!dir.contains(&"k".to_string()).await);
    }

    #[tokio::test]
    async fn ttl_eviction_invokes_hook() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir: Directory<String, i32, CountingHook> = Directory::with_hook(CountingHook {
            count: Arc::clone(&count),
        });
        dir.add_with_ttl("k".to_string(), 1, Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!dir.contains(&"k".to_string()).await);
    }

    #[tokio::test]
    async fn removing_before_ttl_elapses_suppresses_hook() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir: Directory<String, i32, CountingHook> = Directory::with_hook(CountingHook {
            count: Arc::clone(&count),
        });
        dir.add_with_ttl("k".to_string(), 1, Duration::from_millis(100))
            .await;
        dir.take(&"k".to_string()).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reinserting_with_ttl_cancels_previous_timer() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir: Directory<String, i32, CountingHook> = Directory::with_hook(CountingHook {
            count: Arc::clone(&count),
        });
        dir.add_with_ttl("k".to_string(), 1, Duration::from_millis(30))
            .await;
        dir.add_with_ttl("k".to_string(), 2, Duration::from_millis(30))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the second timer should have fired.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_can_reenter_directory_without_deadlock() {
        // The hook runs after the internal lock is released (see
        // add_with_ttl's implementation, which drops the lock guard before
        // invoking on_evict), so a hook that looks back into the same
        // directory must not deadlock.
        struct ReentrantHook {
            dir: Directory<String, i32>,
            saw: Arc<AtomicUsize>,
        }
        impl EvictionHook<i32> for ReentrantHook {
            fn on_evict(&self, _value: i32) {
                let dir = self.dir.clone_handle();
                let saw = Arc::clone(&self.saw);
                tokio::spawn(async move {
                    dir.contains(&"a".to_string()).await;
                    saw.fetch_add(1, Ordering::SeqCst);
                });
            }
        }

        let saw = Arc::new(AtomicUsize::new(0));
        let dir: Directory<String, i32> = Directory::default();
        let hook_dir = dir.clone_handle();
        let dir_with_hook: Directory<String, i32, ReentrantHook> = Directory::with_hook(ReentrantHook {
            dir: hook_dir,
            saw: Arc::clone(&saw),
        });
        dir_with_hook
            .add_with_ttl("a".to_string(), 1, Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(saw.load(Ordering::SeqCst), 1);
        drop(dir);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_timers() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir: Directory<String, i32, CountingHook> = Directory::with_hook(CountingHook {
            count: Arc::clone(&count),
        });
        dir.add_with_ttl("k".to_string(), 1, Duration::from_millis(30))
            .await;
        dir.shutdown().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
