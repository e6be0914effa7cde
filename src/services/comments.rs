use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::store::{get_typed, DocumentStore, Precondition, Selector, Versioned, WriteOp};
use crate::models::comment_models::{Comment, CommentStatus, LikeRecord};
use crate::models::{pair_key, COMMENTS, COMMENT_LIKES};
use crate::services::error::MutationError;
use crate::services::retry::{run_cas, CasStep, RetryPolicy};
use crate::utils::session::Claims;

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub text: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes: u64,
}

/// Owns every write to `comments` and `comment_likes`.
#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl CommentService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn add_comment(
        &self,
        target_id: &str,
        author: &Claims,
        request: NewComment,
    ) -> Result<Versioned<Comment>, MutationError> {
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(MutationError::Validation("Comment text is required".to_string()));
        }

        let comment = Comment {
            target_id: target_id.to_string(),
            user_id: author.sub.clone(),
            user_name: request.user_name.trim().to_string(),
            user_role: author.role,
            text,
            parent_id: request.parent_id,
            likes: 0,
            created_at: Utc::now(),
            status: CommentStatus::Visible,
        };

        let id = Uuid::new_v4().to_string();
        run_cas(&self.retry, "add_comment", || self.attempt_add(&id, &comment))
            .await
            .map_err(MutationError::from)?;

        debug!(comment_id = %id, target_id, "comment added");
        Ok(Versioned {
            id,
            version: 1,
            data: comment,
        })
    }

    async fn attempt_add(&self, id: &str, comment: &Comment) -> Result<(), CasStep<MutationError>> {
        let mut ops = Vec::with_capacity(2);
        if let Some(parent_id) = &comment.parent_id {
            let raw = self
                .store
                .get(COMMENTS, parent_id)
                .await?
                .ok_or(CasStep::Reject(MutationError::InvalidParent))?;
            let parent = raw.decode::<Comment>()?;
            if !parent.data.is_root() || parent.data.target_id != comment.target_id {
                return Err(CasStep::Reject(MutationError::InvalidParent));
            }
            // Parent is rewritten unchanged; the reply lands only on the version read here.
            ops.push(WriteOp::put(
                COMMENTS,
                parent_id,
                &raw.data,
                Precondition::Version(raw.version),
            )?);
        }
        ops.push(WriteOp::put(COMMENTS, id, comment, Precondition::Absent)?);

        self.store.commit(ops).await?;
        Ok(())
    }

    /// Removes the comment, its replies and all their like records at once.
    pub async fn delete_comment(
        &self,
        comment_id: &str,
        requester: &Claims,
    ) -> Result<(), MutationError> {
        run_cas(&self.retry, "delete_comment", move || {
            self.attempt_delete(comment_id, requester)
        })
        .await
        .map_err(MutationError::from)
    }

    async fn attempt_delete(
        &self,
        comment_id: &str,
        requester: &Claims,
    ) -> Result<(), CasStep<MutationError>> {
        let comment = get_typed::<Comment>(self.store.as_ref(), COMMENTS, comment_id)
            .await?
            .ok_or(CasStep::Reject(MutationError::CommentNotFound))?;
        if comment.data.user_id != requester.sub && !requester.is_admin() {
            return Err(CasStep::Reject(MutationError::Forbidden));
        }

        let mut doomed = vec![(comment.id, comment.version)];
        if comment.data.is_root() {
            let replies = self
                .store
                .query(&Selector::field_eq(COMMENTS, "parentId", comment_id))
                .await?;
            doomed.extend(replies.into_iter().map(|reply| (reply.id, reply.version)));
        }

        let mut ops = Vec::new();
        for (id, version) in &doomed {
            let likes = self
                .store
                .query(&Selector::field_eq(COMMENT_LIKES, "commentId", id.as_str()))
                .await?;
            ops.extend(
                likes
                    .iter()
                    .map(|like| WriteOp::delete(COMMENT_LIKES, &like.id, Precondition::Version(like.version))),
            );
            ops.push(WriteOp::delete(COMMENTS, id, Precondition::Version(*version)));
        }

        self.store.commit(ops).await?;
        info!(comment_id, removed = doomed.len(), "comment deleted");
        Ok(())
    }

    /// Flips the user's like on a comment. The like record and the counter
    /// change in the same commit so they always agree.
    pub async fn toggle_like(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<LikeState, MutationError> {
        run_cas(&self.retry, "toggle_like", move || {
            self.attempt_toggle(comment_id, user_id)
        })
        .await
        .map_err(MutationError::from)
    }

    async fn attempt_toggle(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<LikeState, CasStep<MutationError>> {
        let like_id = pair_key(comment_id, user_id);
        let like = self.store.get(COMMENT_LIKES, &like_id).await?;
        let comment = get_typed::<Comment>(self.store.as_ref(), COMMENTS, comment_id)
            .await?
            .ok_or(CasStep::Reject(MutationError::CommentNotFound))?;

        let mut updated = comment.data;
        let comment_op_expect = Precondition::Version(comment.version);

        let (like_op, liked) = match like {
            Some(existing) => {
                if updated.likes == 0 {
                    error!(comment_id, user_id, "like record present on a comment with zero likes");
                }
                updated.likes = updated.likes.saturating_sub(1);
                (
                    WriteOp::delete(COMMENT_LIKES, &like_id, Precondition::Version(existing.version)),
                    false,
                )
            }
            None => {
                updated.likes += 1;
                let record = LikeRecord {
                    comment_id: comment_id.to_string(),
                    user_id: user_id.to_string(),
                    timestamp: Utc::now(),
                };
                (
                    WriteOp::put(COMMENT_LIKES, &like_id, &record, Precondition::Absent)?,
                    true,
                )
            }
        };

        self.store
            .commit(vec![
                like_op,
                WriteOp::put(COMMENTS, comment_id, &updated, comment_op_expect)?,
            ])
            .await?;

        Ok(LikeState {
            liked,
            likes: updated.likes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::{ChangeFeed, RawDocument, StoreError};
    use crate::utils::session::Role;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::Mutex;

    /// Commits `interleaved` straight to the inner store right before the
    /// first commit that creates a document, as if another writer got there
    /// between that writer's reads and its commit.
    struct Interleaving {
        inner: Arc<MemoryStore>,
        interleaved: Mutex<Option<Vec<WriteOp>>>,
    }

    #[async_trait]
    impl DocumentStore for Interleaving {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, StoreError> {
            self.inner.get(collection, id).await
        }

        async fn query(&self, selector: &Selector) -> Result<Vec<RawDocument>, StoreError> {
            self.inner.query(selector).await
        }

        async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
            let creates = ops.iter().any(|op| op.expect() == Precondition::Absent);
            let pending = if creates {
                self.interleaved.lock().unwrap().take()
            } else {
                None
            };
            if let Some(pending) = pending {
                self.inner.commit(pending).await?;
            }
            self.inner.commit(ops).await
        }

        async fn watch(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
            self.inner.watch(collection).await
        }
    }

    fn interleaved_service(store: &Arc<MemoryStore>, ops: Vec<WriteOp>) -> CommentService {
        let wrapper = Interleaving {
            inner: store.clone(),
            interleaved: Mutex::new(Some(ops)),
        };
        CommentService::new(Arc::new(wrapper), RetryPolicy::default())
    }

    fn claims(user: &str, role: Role) -> Claims {
        Claims {
            sub: user.to_string(),
            role,
            exp: usize::MAX,
        }
    }

    fn service() -> (Arc<MemoryStore>, CommentService) {
        let store = Arc::new(MemoryStore::new());
        let policy = RetryPolicy {
            max_attempts: 8,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        };
        (store.clone(), CommentService::new(store, policy))
    }

    async fn post(comments: &CommentService, target: &str, author: &str, parent: Option<&str>) -> String {
        comments
            .add_comment(
                target,
                &claims(author, Role::Student),
                NewComment {
                    text: "Nice lesson".to_string(),
                    user_name: author.to_string(),
                    parent_id: parent.map(str::to_string),
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn likes_of(store: &MemoryStore, comment_id: &str) -> u64 {
        get_typed::<Comment>(store, COMMENTS, comment_id)
            .await
            .unwrap()
            .unwrap()
            .data
            .likes
    }

    #[tokio::test]
    async fn even_toggles_restore_odd_toggles_leave_one_like() {
        let (store, comments) = service();
        let comment_id = post(&comments, "lesson-1", "author", None).await;

        for round in 1..=5u64 {
            let state = comments.toggle_like(&comment_id, "U1").await.unwrap();
            assert_eq!(state.liked, round % 2 == 1);
            assert_eq!(state.likes, round % 2);
        }
        assert_eq!(likes_of(&store, &comment_id).await, 1);
        assert!(store.get(COMMENT_LIKES, &pair_key(&comment_id, "U1")).await.unwrap().is_some());

        comments.toggle_like(&comment_id, "U1").await.unwrap();
        assert_eq!(likes_of(&store, &comment_id).await, 0);
        assert!(store.get(COMMENT_LIKES, &pair_key(&comment_id, "U1")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counter_matches_like_records_under_contention() {
        let (store, comments) = service();
        let comment_id = post(&comments, "lesson-1", "author", None).await;

        let results = join_all((0..6).map(|i| {
            let comments = comments.clone();
            let comment_id = comment_id.clone();
            tokio::spawn(async move { comments.toggle_like(&comment_id, &format!("user-{}", i)).await })
        }))
        .await;
        for result in results {
            match result.unwrap() {
                Ok(_) | Err(MutationError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        let records = store
            .query(&Selector::field_eq(COMMENT_LIKES, "commentId", comment_id.as_str()))
            .await
            .unwrap();
        assert_eq!(likes_of(&store, &comment_id).await, records.len() as u64);
    }

    #[tokio::test]
    async fn liking_a_missing_comment_fails() {
        let (_, comments) = service();
        assert_eq!(
            comments.toggle_like("nope", "U1").await,
            Err(MutationError::CommentNotFound)
        );
    }

    #[tokio::test]
    async fn replies_nest_exactly_one_level() {
        let (_, comments) = service();
        let root = post(&comments, "lesson-1", "a", None).await;
        let reply = post(&comments, "lesson-1", "b", Some(&root)).await;

        let nested = comments
            .add_comment(
                "lesson-1",
                &claims("c", Role::Student),
                NewComment {
                    text: "deeper".to_string(),
                    user_name: String::new(),
                    parent_id: Some(reply),
                },
            )
            .await;
        assert_eq!(nested.unwrap_err(), MutationError::InvalidParent);

        let elsewhere = comments
            .add_comment(
                "lesson-2",
                &claims("c", Role::Student),
                NewComment {
                    text: "wrong page".to_string(),
                    user_name: String::new(),
                    parent_id: Some(root),
                },
            )
            .await;
        assert_eq!(elsewhere.unwrap_err(), MutationError::InvalidParent);
    }

    #[tokio::test]
    async fn delete_cascades_to_replies_and_likes() {
        let (store, comments) = service();
        let root = post(&comments, "lesson-1", "a", None).await;
        let reply = post(&comments, "lesson-1", "b", Some(&root)).await;
        comments.toggle_like(&root, "x").await.unwrap();
        comments.toggle_like(&reply, "y").await.unwrap();

        assert_eq!(
            comments.delete_comment(&root, &claims("stranger", Role::Student)).await,
            Err(MutationError::Forbidden)
        );
        comments
            .delete_comment(&root, &claims("moderator", Role::Admin))
            .await
            .unwrap();

        assert!(store.query(&Selector::all(COMMENTS)).await.unwrap().is_empty());
        assert!(store.query(&Selector::all(COMMENT_LIKES)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_comments_are_rejected() {
        let (_, comments) = service();
        let result = comments
            .add_comment(
                "lesson-1",
                &claims("a", Role::Student),
                NewComment {
                    text: "   ".to_string(),
                    user_name: String::new(),
                    parent_id: None,
                },
            )
            .await;
        assert!(matches!(result, Err(MutationError::Validation(_))));
    }

    #[tokio::test]
    async fn reply_racing_a_thread_delete_is_not_orphaned() {
        let (store, comments) = service();
        let root = post(&comments, "lesson-1", "a", None).await;

        let racing = interleaved_service(
            &store,
            vec![WriteOp::delete(COMMENTS, &root, Precondition::Exists)],
        );
        let reply = racing
            .add_comment(
                "lesson-1",
                &claims("b", Role::Student),
                NewComment {
                    text: "late reply".to_string(),
                    user_name: "b".to_string(),
                    parent_id: Some(root.clone()),
                },
            )
            .await;

        assert_eq!(reply.unwrap_err(), MutationError::InvalidParent);
        assert!(store.query(&Selector::all(COMMENTS)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_retries_when_the_parent_changes_underneath() {
        let (store, comments) = service();
        let root = post(&comments, "lesson-1", "a", None).await;
        let current = store.get(COMMENTS, &root).await.unwrap().unwrap();

        let racing = interleaved_service(
            &store,
            vec![WriteOp::put(COMMENTS, &root, &current.data, Precondition::Version(current.version)).unwrap()],
        );
        let reply = post(&racing, "lesson-1", "b", Some(&root)).await;

        let stored = get_typed::<Comment>(store.as_ref(), COMMENTS, &reply)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data.parent_id.as_deref(), Some(root.as_str()));
        assert_eq!(store.query(&Selector::all(COMMENTS)).await.unwrap().len(), 2);
    }
}
