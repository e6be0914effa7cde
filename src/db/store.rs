use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

/// A stored document together with its identity and its optimistic
/// concurrency version. Versions start at 1 and grow by one on every put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub id: String,
    pub version: u64,
    #[serde(flatten)]
    pub data: T,
}

pub type RawDocument = Versioned<Value>;

impl RawDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Versioned<T>, StoreError> {
        Ok(Versioned {
            id: self.id.clone(),
            version: self.version,
            data: serde_json::from_value(self.data.clone())?,
        })
    }
}

/// Collection name plus an optional single-field equality filter. Ordering
/// is deliberately absent: consumers sort after fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub collection: String,
    pub filter: Option<(String, Value)>,
}

impl Selector {
    pub fn all(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filter: None,
        }
    }

    pub fn field_eq(collection: &str, field: &str, value: impl Into<Value>) -> Self {
        Self {
            collection: collection.to_string(),
            filter: Some((field.to_string(), value.into())),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        match &self.filter {
            None => true,
            Some((field, expected)) => data.get(field) == Some(expected),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            None => write!(f, "{}", self.collection),
            Some((field, value)) => write!(f, "{}[{}={}]", self.collection, field, value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The document must not exist yet.
    Absent,
    /// The document must exist with exactly this version.
    Version(u64),
    /// The document must exist, any version.
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        collection: String,
        id: String,
        data: Value,
        expect: Precondition,
    },
    Delete {
        collection: String,
        id: String,
        expect: Precondition,
    },
}

impl WriteOp {
    pub fn put<T: Serialize>(
        collection: &str,
        id: &str,
        data: &T,
        expect: Precondition,
    ) -> Result<Self, StoreError> {
        Ok(WriteOp::Put {
            collection: collection.to_string(),
            id: id.to_string(),
            data: serde_json::to_value(data)?,
            expect,
        })
    }

    pub fn delete(collection: &str, id: &str, expect: Precondition) -> Self {
        WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            expect,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }

    pub fn expect(&self) -> Precondition {
        match self {
            WriteOp::Put { expect, .. } | WriteOp::Delete { expect, .. } => *expect,
        }
    }
}

/// Revision counter of one collection. It ticks after every committed
/// change; a closed feed means the underlying transport went away.
pub type ChangeFeed = watch::Receiver<u64>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("precondition failed for {collection}/{id}")]
    PreconditionFailed { collection: String, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed { .. })
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, StoreError>;

    async fn query(&self, selector: &Selector) -> Result<Vec<RawDocument>, StoreError>;

    /// Applies every op or none of them.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn watch(&self, collection: &str) -> Result<ChangeFeed, StoreError>;
}

pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<Versioned<T>>, StoreError> {
    store
        .get(collection, id)
        .await?
        .map(|doc| doc.decode())
        .transpose()
}
