//! Pure derivations over raw collection snapshots. Nothing in here performs
//! I/O or reads the clock: the reference instant is always an argument, so
//! identical inputs give byte-identical outputs.

pub mod dashboard;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::db::store::RawDocument;

pub const MONTH_BUCKETS: usize = 7;

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Latest snapshot of every source feeding one derived view, keyed by
/// source name. Missing sources read as empty.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    by_name: BTreeMap<String, Arc<Vec<RawDocument>>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, records: Arc<Vec<RawDocument>>) {
        self.by_name.insert(name.to_string(), records);
    }

    pub fn len(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, |records| records.len())
    }

    /// Decodes a source, skipping documents that do not fit `T`.
    pub fn records<T: DeserializeOwned>(&self, name: &str) -> Vec<T> {
        self.by_name
            .get(name)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|doc| serde_json::from_value(doc.data.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `round(count / total * 100)`, with an empty total giving 0.
pub fn percentage(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round() as u32
}

/// Change from `previous` to `current` in percent, one decimal place.
pub fn growth(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    ((current - previous) / previous * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub value: u64,
}

/// One row per distinct key, ordered by key. Blank keys count as `unknown`.
pub fn count_by<R>(records: &[R], key: impl Fn(&R) -> &str) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for record in records {
        let name = match key(record).trim() {
            "" => "unknown",
            name => name,
        };
        *counts.entry(name).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, value)| CategoryCount {
            name: name.to_string(),
            value,
        })
        .collect()
}

fn month_index(at: DateTime<Utc>) -> i64 {
    i64::from(at.year()) * 12 + i64::from(at.month0())
}

/// Groups records into the `MONTH_BUCKETS` calendar months ending with the
/// month of `as_of`, oldest first. Empty months are zero-filled; records
/// outside the window or without a timestamp are ignored.
pub fn monthly_buckets<R, V: Default>(
    records: &[R],
    as_of: DateTime<Utc>,
    timestamp: impl Fn(&R) -> Option<DateTime<Utc>>,
    mut add: impl FnMut(&mut V, &R),
) -> Vec<(String, V)> {
    let last = month_index(as_of);
    let first = last - (MONTH_BUCKETS as i64 - 1);

    let mut buckets: Vec<(String, V)> = (first..=last)
        .map(|index| {
            let label = MONTH_LABELS[index.rem_euclid(12) as usize];
            (label.to_string(), V::default())
        })
        .collect();

    for record in records {
        let Some(at) = timestamp(record) else { continue };
        let index = month_index(at);
        if index < first || index > last {
            continue;
        }
        add(&mut buckets[(index - first) as usize].1, record);
    }
    buckets
}
