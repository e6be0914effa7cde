use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exists iff the user has voted on the poll. Never updated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub poll_id: String,
    pub user_id: String,
    pub option_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Poll version the vote was committed against.
    pub poll_version: u64,
    pub options_fingerprint: String,
}
