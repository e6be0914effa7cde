use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use super::hub::{Cancel, Health, Live};
use crate::db::store::StoreError;

struct Active<K> {
    key: K,
    generation: u64,
    handle: Box<dyn Live>,
}

/// Keeps exactly one subscription set open for a consumer, keyed by the
/// parameters it was opened with (for example an analytics time range).
///
/// Switching parameters cancels the old set before the new one is opened,
/// so the two never deliver concurrently. Every opened set gets a fresh
/// generation number that consumers can use to discard messages queued by
/// an older set.
pub struct SubscriptionManager<K> {
    active: Mutex<Option<Active<K>>>,
    generations: AtomicU64,
}

impl<K> Default for SubscriptionManager<K> {
    fn default() -> Self {
        Self {
            active: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }
}

impl<K: Clone + PartialEq + Debug + Send> SubscriptionManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `key` the active parameter set and returns its generation.
    /// Switching to the key that is already active keeps the open set.
    pub async fn switch<F, Fut, H>(&self, key: K, open: F) -> Result<u64, StoreError>
    where
        F: FnOnce(K, u64) -> Fut,
        Fut: Future<Output = Result<H, StoreError>>,
        H: Live + 'static,
    {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.key == key {
                return Ok(current.generation);
            }
        }

        if let Some(previous) = active.take() {
            previous.handle.cancel();
            debug!(key = ?previous.key, generation = previous.generation, "subscription set closed");
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = open(key.clone(), generation).await?;
        debug!(key = ?key, generation, "subscription set opened");
        *active = Some(Active {
            key,
            generation,
            handle: Box::new(handle),
        });
        Ok(generation)
    }

    pub async fn current(&self) -> Option<(K, u64)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| (active.key.clone(), active.generation))
    }

    /// Health of the open set, if any.
    pub async fn health(&self) -> Option<Health> {
        self.active.lock().await.as_ref().map(|active| active.handle.health())
    }

    /// Cancels whatever is open. Safe to call repeatedly.
    pub async fn teardown(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.handle.cancel();
            debug!(key = ?previous.key, "subscription set torn down");
        }
    }
}

impl<K> Drop for SubscriptionManager<K> {
    fn drop(&mut self) {
        if let Some(previous) = self.active.get_mut().take() {
            previous.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Counter {
        open: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
    }

    struct FakeSet {
        counter: Counter,
        cancelled: std::sync::atomic::AtomicBool,
    }

    impl Cancel for FakeSet {
        fn cancel(&self) {
            if !self.cancelled.swap(true, Ordering::SeqCst) {
                self.counter.open.fetch_sub(1, Ordering::SeqCst);
                self.counter.cancels.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl Live for FakeSet {
        fn health(&self) -> Health {
            Health::Live
        }
    }

    fn opener(counter: &Counter) -> impl FnOnce(&'static str, u64) -> std::future::Ready<Result<FakeSet, StoreError>> {
        let counter = counter.clone();
        move |_, _| {
            assert_eq!(counter.open.fetch_add(1, Ordering::SeqCst), 0, "overlapping subscription sets");
            std::future::ready(Ok(FakeSet {
                counter,
                cancelled: std::sync::atomic::AtomicBool::new(false),
            }))
        }
    }

    #[tokio::test]
    async fn switching_closes_before_opening() {
        let counter = Counter::default();
        let manager = SubscriptionManager::new();

        let first = manager.switch("7d", opener(&counter)).await.unwrap();
        let same = manager.switch("7d", opener(&counter)).await.unwrap();
        assert_eq!(first, same);

        let second = manager.switch("30d", opener(&counter)).await.unwrap();
        assert!(second > first);
        assert_eq!(counter.open.load(Ordering::SeqCst), 1);
        assert_eq!(counter.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(manager.current().await, Some(("30d", second)));
        assert_eq!(manager.health().await, Some(Health::Live));

        manager.teardown().await;
        manager.teardown().await;
        assert_eq!(counter.open.load(Ordering::SeqCst), 0);
        assert_eq!(manager.current().await, None);
        assert_eq!(manager.health().await, None);
    }

    #[tokio::test]
    async fn dropping_the_manager_cancels_the_open_set() {
        let counter = Counter::default();
        {
            let manager = SubscriptionManager::new();
            manager.switch("all", opener(&counter)).await.unwrap();
        }
        assert_eq!(counter.open.load(Ordering::SeqCst), 0);
        assert_eq!(counter.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_nothing_active() {
        let counter = Counter::default();
        let manager = SubscriptionManager::new();
        manager.switch("7d", opener(&counter)).await.unwrap();

        let result = manager
            .switch("30d", |_, _| {
                std::future::ready(Err::<FakeSet, _>(StoreError::Unavailable("down".to_string())))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.current().await, None);
        assert_eq!(counter.open.load(Ordering::SeqCst), 0);
    }
}
