use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    bson::{doc, to_bson, Bson, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR},
    Client, ClientSession, Database,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::store::{
    ChangeFeed, DocumentStore, Precondition, RawDocument, Selector, StoreError, WriteOp,
};

const DUPLICATE_KEY: i32 = 11000;
const WRITE_CONFLICT: i32 = 112;

/// MongoDB backend. Each stored document has the shape
/// `{ _id, _v, data }` where `_v` is the optimistic version.
/// Atomic commits and change streams both require a replica set.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    async fn apply(&self, op: &WriteOp, session: &mut ClientSession) -> Result<(), StoreError> {
        let coll = self.db.collection::<Document>(op.collection());
        let conflict = || precondition_failed(op);
        let id = op.id();

        match op {
            WriteOp::Put { data, expect, .. } => {
                let data = to_bson(data).map_err(|e| StoreError::Backend(e.to_string()))?;
                match expect {
                    Precondition::Absent => {
                        let inserted = coll
                            .insert_one(doc! { "_id": id, "_v": 1_i64, "data": data })
                            .session(&mut *session)
                            .await;
                        match inserted {
                            Ok(_) => Ok(()),
                            Err(err) if is_conflict(&err) => Err(conflict()),
                            Err(err) => Err(unavailable(err)),
                        }
                    }
                    Precondition::Version(_) | Precondition::Exists => {
                        let mut filter = doc! { "_id": id };
                        if let Precondition::Version(version) = expect {
                            filter.insert("_v", *version as i64);
                        }
                        let result = coll
                            .update_one(filter, doc! { "$set": { "data": data }, "$inc": { "_v": 1_i64 } })
                            .session(&mut *session)
                            .await
                            .map_err(|err| classify(err, op))?;
                        if result.matched_count == 0 {
                            return Err(conflict());
                        }
                        Ok(())
                    }
                }
            }
            WriteOp::Delete { expect, .. } => {
                let mut filter = doc! { "_id": id };
                match expect {
                    Precondition::Absent => {
                        let existing = coll
                            .find_one(filter)
                            .session(&mut *session)
                            .await
                            .map_err(|err| classify(err, op))?;
                        return match existing {
                            Some(_) => Err(conflict()),
                            None => Ok(()),
                        };
                    }
                    Precondition::Version(version) => {
                        filter.insert("_v", *version as i64);
                    }
                    Precondition::Exists => {}
                }
                let result = coll
                    .delete_one(filter)
                    .session(&mut *session)
                    .await
                    .map_err(|err| classify(err, op))?;
                if result.deleted_count == 0 {
                    return Err(conflict());
                }
                Ok(())
            }
        }
    }
}

fn precondition_failed(op: &WriteOp) -> StoreError {
    StoreError::PreconditionFailed {
        collection: op.collection().to_string(),
        id: op.id().to_string(),
    }
}

fn is_conflict(err: &MongoError) -> bool {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return true;
    }
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => {
            command.code == DUPLICATE_KEY || command.code == WRITE_CONFLICT
        }
        _ => false,
    }
}

fn classify(err: MongoError, op: &WriteOp) -> StoreError {
    if is_conflict(&err) {
        precondition_failed(op)
    } else {
        unavailable(err)
    }
}

fn unavailable(err: MongoError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn decode(document: Document) -> Result<RawDocument, StoreError> {
    let id = document
        .get_str("_id")
        .map_err(|e| StoreError::Backend(format!("document without string _id: {}", e)))?
        .to_string();
    let version = document
        .get_i64("_v")
        .map_err(|e| StoreError::Backend(format!("document {} without _v: {}", id, e)))?;
    let data = document
        .get("data")
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .unwrap_or(Value::Null);
    Ok(RawDocument {
        id,
        version: version as u64,
        data,
    })
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, StoreError> {
        let found = self
            .db
            .collection::<Document>(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(unavailable)?;
        found.map(decode).transpose()
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<RawDocument>, StoreError> {
        let mut filter = doc! {};
        if let Some((field, value)) = &selector.filter {
            let value = to_bson(value).map_err(|e| StoreError::Backend(e.to_string()))?;
            filter.insert(format!("data.{}", field), value);
        }

        let cursor = self
            .db
            .collection::<Document>(&selector.collection)
            .find(filter)
            .await
            .map_err(unavailable)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(unavailable)?;
        documents.into_iter().map(decode).collect()
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut session = self.client.start_session().await.map_err(unavailable)?;
        session.start_transaction().await.map_err(unavailable)?;

        for op in &ops {
            if let Err(err) = self.apply(op, &mut session).await {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("Failed to abort transaction: {}", abort);
                }
                return Err(err);
            }
        }

        match session.commit_transaction().await {
            Ok(()) => Ok(()),
            Err(err) if is_conflict(&err) => match ops.first() {
                Some(op) => Err(precondition_failed(op)),
                None => Ok(()),
            },
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn watch(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        let mut stream = self
            .db
            .collection::<Document>(collection)
            .watch()
            .await
            .map_err(unavailable)?;

        let (sender, receiver) = watch::channel(0_u64);
        let name = collection.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    next = stream.next() => match next {
                        Some(Ok(_)) => sender.send_modify(|revision| *revision += 1),
                        Some(Err(err)) => {
                            warn!(collection = %name, "Change stream interrupted: {}", err);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(collection = %name, "change stream closed");
        });

        Ok(receiver)
    }
}
