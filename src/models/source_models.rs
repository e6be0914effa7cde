//! Read-only records consumed by the dashboards. Every field is optional on
//! the wire so partially filled documents still aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAccount {
    pub role: String,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub join_date: Option<DateTime<Utc>>,
    pub class_level: Option<String>,
}

impl UserAccount {
    pub fn is_teacher(&self) -> bool {
        self.role == "teacher"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Payment {
    pub amount: f64,
    pub status: String,
    pub payment_method: String,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub const APPROVED: &'static str = "approved";

    pub fn is_approved(&self) -> bool {
        self.status == Self::APPROVED
    }
}
