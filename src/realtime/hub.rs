use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::aggregator::Sources;
use crate::db::store::{ChangeFeed, DocumentStore, RawDocument, Selector, StoreError};
use crate::services::retry::RetryPolicy;

/// Full materialized result of one live query.
pub type Snapshot = Arc<Vec<RawDocument>>;

/// A handle that detaches a live query. Cancelling twice is a no-op.
///
/// Once `cancel` returns, the callback will not run again. It must not be
/// called from inside the same subscription's callback.
pub trait Cancel: Send + Sync {
    fn cancel(&self);
}

/// A live query whose health can be watched by its owner.
pub trait Live: Cancel {
    fn health(&self) -> Health;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Health {
    Live,
    Connecting,
    Reconnecting,
    Failed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes deliveries against cancellation.
struct Gate {
    closed: Mutex<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            closed: Mutex::new(false),
        }
    }

    fn pass(&self, deliver: impl FnOnce()) -> bool {
        let closed = lock(&self.closed);
        if *closed {
            return false;
        }
        deliver();
        true
    }

    /// Returns true only for the call that actually closed the gate.
    fn close(&self) -> bool {
        let mut closed = lock(&self.closed);
        !std::mem::replace(&mut *closed, true)
    }
}

pub struct Subscription {
    selector: Selector,
    gate: Arc<Gate>,
    health: Arc<Mutex<Health>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn health(&self) -> Health {
        *lock(&self.health)
    }
}

impl Cancel for Subscription {
    fn cancel(&self) {
        if self.gate.close() {
            self.task.abort();
            debug!(selector = %self.selector, "subscription cancelled");
        }
    }
}

impl Live for Subscription {
    fn health(&self) -> Health {
        Subscription::health(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Several live queries fanned into one callback.
pub struct MergedSubscription {
    gate: Arc<Gate>,
    parts: Vec<Subscription>,
}

impl MergedSubscription {
    /// Worst health among the constituent streams.
    pub fn health(&self) -> Health {
        self.parts
            .iter()
            .map(Subscription::health)
            .max()
            .unwrap_or(Health::Live)
    }
}

impl Cancel for MergedSubscription {
    fn cancel(&self) {
        if self.gate.close() {
            for part in &self.parts {
                part.cancel();
            }
        }
    }
}

impl Live for MergedSubscription {
    fn health(&self) -> Health {
        MergedSubscription::health(self)
    }
}

impl Drop for MergedSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Opens live queries against the injected store.
#[derive(Clone)]
pub struct LiveQueryHub {
    store: Arc<dyn DocumentStore>,
    reconnect: RetryPolicy,
}

impl LiveQueryHub {
    pub fn new(store: Arc<dyn DocumentStore>, reconnect: RetryPolicy) -> Self {
        Self { store, reconnect }
    }

    /// Calls `on_change` with the full result set now and after every
    /// change to the selected documents. Transport interruptions are
    /// repaired silently; the stream goes to `Health::Failed` only when
    /// re-establishing it keeps failing.
    pub async fn subscribe<F>(&self, selector: Selector, on_change: F) -> Result<Subscription, StoreError>
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        let feed = self.store.watch(&selector.collection).await?;
        let gate = Arc::new(Gate::new());
        let health = Arc::new(Mutex::new(Health::Connecting));

        let source = Source {
            store: self.store.clone(),
            selector: selector.clone(),
            policy: self.reconnect,
            gate: gate.clone(),
            health: health.clone(),
        };
        let task = tokio::spawn(source.run(feed, on_change));
        debug!(%selector, "subscription opened");

        Ok(Subscription {
            selector,
            gate,
            health,
            task,
        })
    }

    /// Fires only once every selector has produced a snapshot, then on
    /// every later update from any of them, always with the latest snapshot
    /// of each. Sources are keyed by collection name.
    pub async fn subscribe_merged<F>(
        &self,
        selectors: Vec<Selector>,
        on_change: F,
    ) -> Result<MergedSubscription, StoreError>
    where
        F: Fn(Sources) + Send + Sync + 'static,
    {
        let names: Arc<Vec<String>> =
            Arc::new(selectors.iter().map(|s| s.collection.clone()).collect());
        let latest: Arc<Mutex<Vec<Option<Snapshot>>>> =
            Arc::new(Mutex::new(vec![None; selectors.len()]));
        let gate = Arc::new(Gate::new());
        let on_change = Arc::new(on_change);

        let mut parts = Vec::with_capacity(selectors.len());
        for (slot, selector) in selectors.into_iter().enumerate() {
            let names = names.clone();
            let latest = latest.clone();
            let gate = gate.clone();
            let on_change = on_change.clone();

            // Dropping `parts` on an early return cancels what was opened.
            let part = self
                .subscribe(selector, move |snapshot| {
                    let mut latest = lock(&latest);
                    latest[slot] = Some(snapshot);
                    if latest.iter().all(Option::is_some) {
                        let mut sources = Sources::new();
                        for (name, snapshot) in names.iter().zip(latest.iter().flatten()) {
                            sources.insert(name, snapshot.clone());
                        }
                        gate.pass(|| on_change(sources));
                    }
                })
                .await?;
            parts.push(part);
        }

        Ok(MergedSubscription { gate, parts })
    }
}

struct Source {
    store: Arc<dyn DocumentStore>,
    selector: Selector,
    policy: RetryPolicy,
    gate: Arc<Gate>,
    health: Arc<Mutex<Health>>,
}

impl Source {
    fn set_health(&self, health: Health) {
        *lock(&self.health) = health;
    }

    async fn run<F: Fn(Snapshot)>(self, mut feed: ChangeFeed, on_change: F) {
        let mut failures = 0;
        loop {
            match self.store.query(&self.selector).await {
                Ok(documents) => {
                    failures = 0;
                    self.set_health(Health::Live);
                    let snapshot = Arc::new(documents);
                    if !self.gate.pass(|| on_change(snapshot)) {
                        return;
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(selector = %self.selector, failures, "Snapshot read failed: {}", err);
                    if failures >= self.policy.max_attempts {
                        self.fail(failures);
                        return;
                    }
                    match self.reconnect().await {
                        Some(next) => feed = next,
                        None => return,
                    }
                    continue;
                }
            }

            if feed.changed().await.is_err() {
                debug!(selector = %self.selector, "change feed interrupted");
                match self.reconnect().await {
                    Some(next) => feed = next,
                    None => return,
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<ChangeFeed> {
        self.set_health(Health::Reconnecting);
        let mut attempts = 0;
        let feed = backoff::future::retry(self.policy.backoff(), || {
            attempts += 1;
            let attempt = attempts;
            async move {
                match self.store.watch(&self.selector.collection).await {
                    Ok(feed) => {
                        debug!(selector = %self.selector, attempt, "subscription re-established");
                        Ok(feed)
                    }
                    Err(err) if attempt >= self.policy.max_attempts => {
                        Err(backoff::Error::permanent(err))
                    }
                    Err(err) => {
                        debug!(selector = %self.selector, attempt, "Reconnect failed: {}", err);
                        Err(backoff::Error::transient(err))
                    }
                }
            }
        })
        .await;

        match feed {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(selector = %self.selector, "Last reconnect attempt failed: {}", err);
                self.fail(attempts);
                None
            }
        }
    }

    fn fail(&self, attempts: u32) {
        error!(selector = %self.selector, attempts, "subscription failed permanently");
        self.set_health(Health::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::{Precondition, WriteOp};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn hub(store: Arc<MemoryStore>) -> LiveQueryHub {
        LiveQueryHub::new(
            store,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        )
    }

    async fn put(store: &MemoryStore, collection: &str, id: &str, data: serde_json::Value) {
        store
            .commit(vec![WriteOp::put(collection, id, &data, Precondition::Absent).unwrap()])
            .await
            .unwrap();
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no delivery within 2s")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_full_snapshots_on_every_change() {
        let store = Arc::new(MemoryStore::new());
        put(&store, "comments", "c1", json!({ "targetId": "l1" })).await;
        put(&store, "comments", "c2", json!({ "targetId": "l2" })).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = hub(store.clone())
            .subscribe(Selector::field_eq("comments", "targetId", "l1"), move |snapshot| {
                let _ = tx.send(snapshot.iter().map(|d| d.id.clone()).collect::<Vec<_>>());
            })
            .await
            .unwrap();

        assert_eq!(next(&mut rx).await, ["c1"]);
        put(&store, "comments", "c3", json!({ "targetId": "l1" })).await;
        assert_eq!(next(&mut rx).await, ["c1", "c3"]);
        store
            .commit(vec![WriteOp::delete("comments", "c1", Precondition::Exists)])
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, ["c3"]);
    }

    #[tokio::test]
    async fn nothing_arrives_after_cancel() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = hub(store.clone())
            .subscribe(Selector::all("polls"), move |snapshot| {
                let _ = tx.send(snapshot.len());
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, 0);

        sub.cancel();
        sub.cancel();
        put(&store, "polls", "p1", json!({})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnects_silently_and_replays_latest() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = hub(store.clone())
            .subscribe(Selector::all("polls"), move |snapshot| {
                let _ = tx.send(snapshot.len());
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, 0);

        store.interrupt("polls");
        assert_eq!(next(&mut rx).await, 0);
        put(&store, "polls", "p1", json!({})).await;
        assert_eq!(next(&mut rx).await, 1);
        assert_eq!(sub.health(), Health::Live);
    }

    #[tokio::test]
    async fn merged_waits_for_every_source() {
        let store = Arc::new(MemoryStore::new());
        put(&store, "users", "u1", json!({})).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let merged = hub(store.clone())
            .subscribe_merged(
                vec![Selector::all("users"), Selector::field_eq("payments", "status", "approved")],
                move |sources| {
                    let _ = tx.send((sources.len("users"), sources.len("payments")));
                },
            )
            .await
            .unwrap();

        assert_eq!(next(&mut rx).await, (1, 0));
        put(&store, "payments", "x", json!({ "status": "approved" })).await;
        assert_eq!(next(&mut rx).await, (1, 1));
        put(&store, "payments", "y", json!({ "status": "pending" })).await;
        put(&store, "users", "u2", json!({})).await;

        let mut last = next(&mut rx).await;
        while let Ok(Some(update)) = timeout(Duration::from_millis(50), rx.recv()).await {
            last = update;
        }
        assert_eq!(last, (2, 1));

        merged.cancel();
        put(&store, "users", "u3", json!({})).await;
        put(&store, "payments", "z", json!({ "status": "approved" })).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
