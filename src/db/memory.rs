use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use super::store::{
    ChangeFeed, DocumentStore, Precondition, RawDocument, Selector, StoreError, WriteOp,
};

type Collection = BTreeMap<String, (u64, Value)>;

/// Process-local store. Commits are serialized behind one lock, which makes
/// every multi-op commit trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    feeds: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes every open feed on `collection`, as a dropped connection would.
    pub fn interrupt(&self, collection: &str) {
        lock(&self.feeds).remove(collection);
    }

    fn notify(&self, touched: HashSet<String>) {
        let feeds = lock(&self.feeds);
        for collection in touched {
            if let Some(sender) = feeds.get(&collection) {
                sender.send_modify(|revision| *revision += 1);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check(current: Option<u64>, expect: Precondition) -> bool {
    match (expect, current) {
        (Precondition::Absent, None) => true,
        (Precondition::Exists, Some(_)) => true,
        (Precondition::Version(want), Some(have)) => want == have,
        _ => false,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, StoreError> {
        let collections = lock(&self.collections);
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(version, data)| RawDocument {
                id: id.to_string(),
                version: *version,
                data: data.clone(),
            }))
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<RawDocument>, StoreError> {
        let collections = lock(&self.collections);
        let Some(docs) = collections.get(&selector.collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, (_, data))| selector.matches(data))
            .map(|(id, (version, data))| RawDocument {
                id: id.clone(),
                version: *version,
                data: data.clone(),
            })
            .collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut touched = HashSet::new();
        {
            let mut collections = lock(&self.collections);

            for op in &ops {
                let current = collections
                    .get(op.collection())
                    .and_then(|docs| docs.get(op.id()))
                    .map(|(version, _)| *version);
                if !check(current, op.expect()) {
                    return Err(StoreError::PreconditionFailed {
                        collection: op.collection().to_string(),
                        id: op.id().to_string(),
                    });
                }
            }

            for op in ops {
                touched.insert(op.collection().to_string());
                match op {
                    WriteOp::Put {
                        collection,
                        id,
                        data,
                        ..
                    } => {
                        let docs = collections.entry(collection).or_default();
                        let version = docs.get(&id).map_or(0, |(version, _)| *version) + 1;
                        docs.insert(id, (version, data));
                    }
                    WriteOp::Delete { collection, id, .. } => {
                        if let Some(docs) = collections.get_mut(&collection) {
                            docs.remove(&id);
                        }
                    }
                }
            }
        }
        trace!(collections = ?touched, "memory commit applied");
        self.notify(touched);
        Ok(())
    }

    async fn watch(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        let mut feeds = lock(&self.feeds);
        let sender = feeds
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(0).0);
        Ok(sender.subscribe())
    }
}

/// Memory store whose change feeds can no longer be opened once it fails.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    broken: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyStore {
    /// Drops the open feeds on `collection` and refuses new ones.
    pub fn fail(&self, collection: &str) {
        self.broken.store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.interrupt(collection);
    }
}

#[cfg(test)]
#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<RawDocument>, StoreError> {
        self.inner.query(selector).await
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.inner.commit(ops).await
    }

    async fn watch(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.watch(collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn versions_start_at_one_and_increment() {
        let store = MemoryStore::new();
        store
            .commit(vec![WriteOp::put("polls", "p1", &json!({ "n": 1 }), Precondition::Absent).unwrap()])
            .await
            .unwrap();
        store
            .commit(vec![WriteOp::put("polls", "p1", &json!({ "n": 2 }), Precondition::Version(1)).unwrap()])
            .await
            .unwrap();

        let doc = store.get("polls", "p1").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.data, json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn failed_precondition_discards_whole_commit() {
        let store = MemoryStore::new();
        store
            .commit(vec![WriteOp::put("polls", "p1", &json!({}), Precondition::Absent).unwrap()])
            .await
            .unwrap();

        let err = store
            .commit(vec![
                WriteOp::put("poll_votes", "p1_u1", &json!({}), Precondition::Absent).unwrap(),
                WriteOp::put("polls", "p1", &json!({ "stale": true }), Precondition::Version(7)).unwrap(),
            ])
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(store.get("poll_votes", "p1_u1").await.unwrap().is_none());
        assert_eq!(store.get("polls", "p1").await.unwrap().unwrap().data, json!({}));
    }

    #[tokio::test]
    async fn watch_ticks_on_commit_and_closes_on_interrupt() {
        let store = MemoryStore::new();
        let mut feed = store.watch("comments").await.unwrap();

        store
            .commit(vec![WriteOp::put("comments", "c1", &json!({}), Precondition::Absent).unwrap()])
            .await
            .unwrap();
        feed.changed().await.unwrap();
        assert_eq!(*feed.borrow(), 1);

        store.interrupt("comments");
        assert!(feed.changed().await.is_err());
    }
}
