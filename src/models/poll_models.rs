use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiry_date: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub vote_count: u64,
}

impl Poll {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn counts_consistent(&self) -> bool {
        self.options.iter().map(|option| option.vote_count).sum::<u64>() == self.total_votes
    }

    /// Stable digest of the option set (ids and labels, in order). Vote
    /// records carry it so a vote can later be matched to the exact option
    /// set it was cast against.
    pub fn options_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for option in &self.options {
            hasher.update(option.id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(option.text.as_bytes());
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }
}
