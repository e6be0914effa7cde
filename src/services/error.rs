use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use super::retry::CasFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Inactive,
    Expired,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedReason::Inactive => write!(f, "Poll is closed"),
            ClosedReason::Expired => write!(f, "Poll expired"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Already voted!")]
    AlreadyVoted,
    #[error("{0}")]
    PollClosed(ClosedReason),
    #[error("Poll not found")]
    PollNotFound,
    #[error("Option not found for this poll")]
    OptionNotFound,
    #[error("Comment not found")]
    CommentNotFound,
    #[error("Replies must target a top-level comment on the same page")]
    InvalidParent,
    #[error("Not allowed to modify this comment")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("Too many concurrent updates, please try again")]
    Conflict { attempts: u32 },
    #[error("Service temporarily unavailable")]
    TransportInterrupted,
}

impl MutationError {
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            MutationError::Conflict { .. } | MutationError::TransportInterrupted
        )
    }
}

impl From<CasFailure<MutationError>> for MutationError {
    fn from(failure: CasFailure<MutationError>) -> Self {
        match failure {
            CasFailure::Rejected(err) => err,
            CasFailure::Exhausted { attempts } => MutationError::Conflict { attempts },
            CasFailure::Store(err) => {
                error!("Store fault during mutation: {}", err);
                MutationError::TransportInterrupted
            }
        }
    }
}

/// Structured result handed to UI collaborators for a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Typed reason behind a failed vote; `message` is its display text.
    #[serde(skip)]
    pub rejection: Option<MutationError>,
}

impl From<Result<(), MutationError>> for VoteOutcome {
    fn from(result: Result<(), MutationError>) -> Self {
        match result {
            Ok(()) => VoteOutcome {
                success: true,
                message: None,
                rejection: None,
            },
            Err(err) => VoteOutcome {
                success: false,
                message: Some(err.to_string()),
                rejection: Some(err),
            },
        }
    }
}

impl From<crate::db::store::StoreError> for MutationError {
    fn from(err: crate::db::store::StoreError) -> Self {
        error!("Store fault: {}", err);
        MutationError::TransportInterrupted
    }
}
