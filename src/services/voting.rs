use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::store::{get_typed, DocumentStore, Precondition, Selector, Versioned, WriteOp};
use crate::models::poll_models::{Poll, PollOption};
use crate::models::vote_record_models::VoteRecord;
use crate::models::{pair_key, POLLS, POLL_VOTES};
use crate::services::error::{ClosedReason, MutationError, VoteOutcome};
use crate::services::retry::{run_cas, CasStep, RetryPolicy};

const DEFAULT_POLL_DAYS: i64 = 7;
const MAX_POLL_DAYS: i64 = 365;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPoll {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub duration_days: Option<i64>,
}

/// Every write to `polls` and `poll_votes` goes through here.
#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl PollService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn create_poll(
        &self,
        request: NewPoll,
        created_by: &str,
    ) -> Result<Versioned<Poll>, MutationError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(MutationError::Validation("Poll title is required".to_string()));
        }

        let labels: Vec<String> = request
            .options
            .iter()
            .map(|option| option.trim().to_string())
            .collect();

        if labels.len() < 2 {
            return Err(MutationError::Validation(
                "Enter atleast 2 options for the user to select from".to_string(),
            ));
        }
        if labels.iter().any(String::is_empty) {
            return Err(MutationError::Validation("Poll options cannot be empty".to_string()));
        }

        let mut deduped: Vec<&String> = Vec::new();
        for label in &labels {
            if !deduped.contains(&label) {
                deduped.push(label);
            }
        }
        if deduped.len() != labels.len() {
            return Err(MutationError::Validation("Poll options must be unique".to_string()));
        }

        let days = request.duration_days.unwrap_or(DEFAULT_POLL_DAYS);
        if !(1..=MAX_POLL_DAYS).contains(&days) {
            return Err(MutationError::Validation(format!(
                "Poll duration must be between 1 and {} days",
                MAX_POLL_DAYS
            )));
        }

        let now = Utc::now();
        let expiry_date = Duration::try_days(days)
            .and_then(|duration| now.checked_add_signed(duration))
            .ok_or_else(|| MutationError::Validation("Poll duration is out of range".to_string()))?;
        let poll = Poll {
            title,
            description: request.description.trim().to_string(),
            options: labels
                .into_iter()
                .enumerate()
                .map(|(idx, text)| PollOption {
                    id: idx.to_string(),
                    text,
                    vote_count: 0,
                })
                .collect(),
            total_votes: 0,
            is_active: true,
            created_at: now,
            expiry_date,
            created_by: created_by.to_string(),
        };

        let id = Uuid::new_v4().to_string();
        self.store
            .commit(vec![WriteOp::put(POLLS, &id, &poll, Precondition::Absent)?])
            .await?;

        info!(poll_id = %id, "poll created");
        Ok(Versioned {
            id,
            version: 1,
            data: poll,
        })
    }

    /// Records the user's vote exactly once. Concurrent calls for the same
    /// (poll, user) pair race on the vote record; losers restart and then
    /// observe `AlreadyVoted`.
    pub async fn cast_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        user_id: &str,
    ) -> Result<(), MutationError> {
        run_cas(&self.retry, "cast_vote", move || {
            self.attempt_vote(poll_id, option_id, user_id)
        })
        .await
        .map_err(MutationError::from)
    }

    async fn attempt_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        user_id: &str,
    ) -> Result<(), CasStep<MutationError>> {
        let vote_id = pair_key(poll_id, user_id);
        if self.store.get(POLL_VOTES, &vote_id).await?.is_some() {
            return Err(CasStep::Reject(MutationError::AlreadyVoted));
        }

        let current = get_typed::<Poll>(self.store.as_ref(), POLLS, poll_id)
            .await?
            .ok_or(CasStep::Reject(MutationError::PollNotFound))?;

        let now = Utc::now();
        let poll = current.data;
        if !poll.is_active {
            return Err(CasStep::Reject(MutationError::PollClosed(ClosedReason::Inactive)));
        }
        if poll.is_expired(now) {
            return Err(CasStep::Reject(MutationError::PollClosed(ClosedReason::Expired)));
        }
        if poll.option(option_id).is_none() {
            return Err(CasStep::Reject(MutationError::OptionNotFound));
        }

        let fingerprint = poll.options_fingerprint();
        let mut updated = poll;
        for option in updated.options.iter_mut() {
            if option.id == option_id {
                option.vote_count += 1;
            }
        }
        updated.total_votes += 1;

        let vote = VoteRecord {
            poll_id: poll_id.to_string(),
            user_id: user_id.to_string(),
            option_id: option_id.to_string(),
            timestamp: now,
            poll_version: current.version + 1,
            options_fingerprint: fingerprint,
        };

        self.store
            .commit(vec![
                WriteOp::put(POLLS, poll_id, &updated, Precondition::Version(current.version))?,
                WriteOp::put(POLL_VOTES, &vote_id, &vote, Precondition::Absent)?,
            ])
            .await?;

        debug!(poll_id, option_id, user_id, "vote recorded");
        Ok(())
    }

    pub async fn vote_on_poll(&self, poll_id: &str, option_id: &str, user_id: &str) -> VoteOutcome {
        let result = self.cast_vote(poll_id, option_id, user_id).await;
        match &result {
            Err(err) if err.is_business_rule() => debug!(poll_id, user_id, "Vote rejected: {}", err),
            Err(err) => warn!(poll_id, user_id, "Voting failed: {}", err),
            Ok(()) => {}
        }
        result.into()
    }

    /// Point-in-time read of the option the user picked, if any.
    pub async fn check_user_vote(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, MutationError> {
        let record =
            get_typed::<VoteRecord>(self.store.as_ref(), POLL_VOTES, &pair_key(poll_id, user_id))
                .await?;
        Ok(record.map(|record| record.data.option_id))
    }

    /// Idempotent: closing an already closed poll succeeds.
    pub async fn close_poll(&self, poll_id: &str) -> Result<(), MutationError> {
        run_cas(&self.retry, "close_poll", move || self.attempt_close(poll_id))
            .await
            .map_err(MutationError::from)
    }

    async fn attempt_close(&self, poll_id: &str) -> Result<(), CasStep<MutationError>> {
        let current = get_typed::<Poll>(self.store.as_ref(), POLLS, poll_id)
            .await?
            .ok_or(CasStep::Reject(MutationError::PollNotFound))?;
        if !current.data.is_active {
            return Ok(());
        }

        let mut closed = current.data;
        closed.is_active = false;
        self.store
            .commit(vec![WriteOp::put(
                POLLS,
                poll_id,
                &closed,
                Precondition::Version(current.version),
            )?])
            .await?;
        info!(poll_id, "poll closed");
        Ok(())
    }

    /// Removes the poll and all of its vote records in one commit.
    pub async fn delete_poll(&self, poll_id: &str) -> Result<(), MutationError> {
        run_cas(&self.retry, "delete_poll", move || self.attempt_delete(poll_id))
            .await
            .map_err(MutationError::from)
    }

    async fn attempt_delete(&self, poll_id: &str) -> Result<(), CasStep<MutationError>> {
        let current = self
            .store
            .get(POLLS, poll_id)
            .await?
            .ok_or(CasStep::Reject(MutationError::PollNotFound))?;
        let votes = self
            .store
            .query(&Selector::field_eq(POLL_VOTES, "pollId", poll_id))
            .await?;

        // A vote landing after the query bumps the poll version and fails this commit.
        let mut ops = vec![WriteOp::delete(
            POLLS,
            poll_id,
            Precondition::Version(current.version),
        )];
        ops.extend(
            votes
                .iter()
                .map(|vote| WriteOp::delete(POLL_VOTES, &vote.id, Precondition::Version(vote.version))),
        );
        self.store.commit(ops).await?;
        info!(poll_id, votes = votes.len(), "poll deleted");
        Ok(())
    }
}
