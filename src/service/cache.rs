//! Single-flight layout cache.
//!
//! One slot per key. A slot holds the last successful value (tagged with
//! the revision it was computed at) and at most one in-flight computation.
//! The computation runs as its own task and publishes into the slot, so it
//! completes even if the caller that started it stops waiting. Every caller
//! for that revision, the first one included, waits on its watch channel.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::{Error, Result};

/// Data version a cache entry was computed against.
///
/// `store` follows the concept store; `epoch` is bumped by explicit
/// invalidation. Ordered store first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision {
    pub store: u64,
    pub epoch: u64,
}

type Outcome<V> = Option<Result<Arc<V>>>;
type Slots<K, V> = Arc<Mutex<HashMap<K, Slot<V>>>>;

struct Slot<V> {
    ready: Option<(Revision, Arc<V>)>,
    inflight: Option<(Revision, watch::Receiver<Outcome<V>>)>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self { ready: None, inflight: None }
    }
}

pub struct LayoutCache<K, V> {
    slots: Slots<K, V>,
}

impl<K, V> Default for LayoutCache<K, V> {
    fn default() -> Self {
        Self { slots: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> LayoutCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `(key, revision)`, computing it at most once.
    ///
    /// `compute` is only called when no run for this revision is in flight.
    /// A failed computation is handed to every waiter and leaves the
    /// previous value in place.
    pub async fn get_or_compute<F, Fut>(&self, key: &K, revision: Revision, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (rx, leader) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_default();
            if let Some((rev, value)) = &slot.ready {
                if *rev == revision {
                    debug!(?key, "layout cache hit");
                    return Ok(Arc::clone(value));
                }
            }
            match &slot.inflight {
                Some((rev, rx)) if *rev == revision && !abandoned(rx) => {
                    debug!(?key, "joining in-flight layout computation");
                    (rx.clone(), None)
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slot.inflight = Some((revision, rx.clone()));
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = leader {
            tokio::spawn(publish(Arc::clone(&self.slots), key.clone(), revision, tx, compute()));
        }
        wait(rx).await
    }

    /// Value for `(key, revision)` if it is already computed.
    pub fn get(&self, key: &K, revision: Revision) -> Option<Arc<V>> {
        let slots = self.slots.lock();
        match slots.get(key)?.ready.as_ref()? {
            (rev, value) if *rev == revision => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Last successful value for `key`, whatever its revision.
    pub fn last_good(&self, key: &K) -> Option<Arc<V>> {
        let slots = self.slots.lock();
        slots.get(key)?.ready.as_ref().map(|(_, value)| Arc::clone(value))
    }

    pub fn ready_count(&self) -> usize {
        self.slots.lock().values().filter(|s| s.ready.is_some()).count()
    }
}

/// Drive one computation to completion, store a success in the slot and
/// publish the outcome to every waiter.
async fn publish<K, V, Fut>(slots: Slots<K, V>, key: K, revision: Revision, tx: watch::Sender<Outcome<V>>, run: Fut)
where
    K: Eq + Hash + std::fmt::Debug,
    Fut: Future<Output = Result<V>>,
{
    let outcome = run.await.map(Arc::new);
    {
        let mut slots = slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            if let Ok(value) = &outcome {
                let newer = slot.ready.as_ref().is_none_or(|(rev, _)| *rev <= revision);
                if newer {
                    slot.ready = Some((revision, Arc::clone(value)));
                }
            }
            if matches!(&slot.inflight, Some((rev, _)) if *rev == revision) {
                slot.inflight = None;
            }
        }
    }
    if let Err(err) = &outcome {
        debug!(?key, error = %err, "layout computation failed, keeping previous entry");
    }
    // nobody may be waiting any more
    let _ = tx.send(Some(outcome));
}

/// The computation died (panicked) without publishing anything.
fn abandoned<V>(rx: &watch::Receiver<Outcome<V>>) -> bool {
    rx.has_changed().is_err() && rx.borrow().is_none()
}

async fn wait<V>(mut rx: watch::Receiver<Outcome<V>>) -> Result<Arc<V>> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().as_ref() {
            return outcome.clone();
        }
        if rx.changed().await.is_err() {
            return match rx.borrow().as_ref() {
                Some(outcome) => outcome.clone(),
                None => Err(Error::Worker("layout computation ended without a result".into())),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn rev(store: u64) -> Revision {
        Revision { store, epoch: 0 }
    }

    #[tokio::test]
    async fn test_hit_after_compute() {
        let cache: LayoutCache<&str, u32> = LayoutCache::new();
        let v = cache.get_or_compute(&"k", rev(1), || async { Ok(7) }).await.unwrap();
        assert_eq!(*v, 7);
        let again = cache
            .get_or_compute(&"k", rev(1), || async { panic!("must not recompute") })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&v, &again));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let cache: Arc<LayoutCache<&str, u32>> = Arc::new(LayoutCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&"k", rev(1), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(*h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_entry_and_reaches_waiters() {
        let cache: Arc<LayoutCache<&str, u32>> = Arc::new(LayoutCache::new());
        cache.get_or_compute(&"k", rev(1), || async { Ok(1) }).await.unwrap();

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(&"k", rev(2), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(Error::Data("boom".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = cache
            .get_or_compute(&"k", rev(2), || async { Ok(99) })
            .await;

        assert!(matches!(follower, Err(Error::Data(ref m)) if m == "boom"));
        assert!(leader.await.unwrap().is_err());
        assert_eq!(cache.last_good(&"k").map(|v| *v), Some(1));
        assert!(cache.get(&"k", rev(2)).is_none());
    }

    #[tokio::test]
    async fn test_first_caller_timing_out_does_not_fail_followers() {
        let cache: Arc<LayoutCache<&str, u32>> = Arc::new(LayoutCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                tokio::time::timeout(
                    Duration::from_millis(30),
                    cache.get_or_compute(&"k", rev(1), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(1)
                    }),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = cache
            .get_or_compute(&"k", rev(1), || async { panic!("a run is already in flight") })
            .await;

        assert!(first.await.unwrap().is_err(), "first caller gave up");
        assert_eq!(follower.map(|v| *v).ok(), Some(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"k", rev(1)).map(|v| *v), Some(1));
    }

    #[tokio::test]
    async fn test_dropped_caller_still_fills_the_slot() {
        let cache: LayoutCache<&str, u32> = LayoutCache::new();
        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_compute(&"k", rev(1), || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(3)
            }),
        )
        .await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get(&"k", rev(1)).map(|v| *v), Some(3));
    }

    #[tokio::test]
    async fn test_crashed_run_is_replaced() {
        let cache: LayoutCache<&str, u32> = LayoutCache::new();
        let crashed = cache
            .get_or_compute(&"k", rev(1), || async { panic!("layout crashed") })
            .await;
        assert!(matches!(crashed, Err(Error::Worker(_))));

        let v = cache.get_or_compute(&"k", rev(1), || async { Ok(5) }).await.unwrap();
        assert_eq!(*v, 5);
    }

    #[tokio::test]
    async fn test_new_revision_recomputes() {
        let cache: LayoutCache<&str, u32> = LayoutCache::new();
        cache.get_or_compute(&"k", rev(1), || async { Ok(1) }).await.unwrap();
        let v = cache.get_or_compute(&"k", rev(2), || async { Ok(2) }).await.unwrap();
        assert_eq!(*v, 2);
        assert!(cache.get(&"k", rev(1)).is_none());
        assert_eq!(cache.ready_count(), 1);
    }
}
