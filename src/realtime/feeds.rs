//! Typed live feeds consumed by the UI layer. Ordering happens here, after
//! the fetch, never in the store query.

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::hub::{LiveQueryHub, MergedSubscription, Snapshot, Subscription};
use crate::aggregator::dashboard::{advanced_analytics, dashboard_stats, AdvancedAnalytics, DashboardStats, TimeRange};
use crate::db::store::{Selector, StoreError, Versioned};
use crate::models::comment_models::Comment;
use crate::models::poll_models::Poll;
use crate::models::source_models::Payment;
use crate::models::{COMMENTS, COURSES, EXAMS, PAYMENTS, POLLS, USERS};

fn decode_all<T: DeserializeOwned>(snapshot: &Snapshot) -> Vec<Versioned<T>> {
    snapshot
        .iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(id = %doc.id, "Skipping malformed document: {}", err);
                None
            }
        })
        .collect()
}

/// Every poll, newest first.
pub async fn subscribe_to_polls<F>(hub: &LiveQueryHub, on_change: F) -> Result<Subscription, StoreError>
where
    F: Fn(Vec<Versioned<Poll>>) + Send + Sync + 'static,
{
    hub.subscribe(Selector::all(POLLS), move |snapshot| {
        let mut polls = decode_all::<Poll>(&snapshot);
        polls.sort_by(|a, b| {
            b.data
                .created_at
                .cmp(&a.data.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        on_change(polls);
    })
    .await
}

/// Comments on one target, newest first.
pub async fn subscribe_to_comments<F>(
    hub: &LiveQueryHub,
    target_id: &str,
    on_change: F,
) -> Result<Subscription, StoreError>
where
    F: Fn(Vec<Versioned<Comment>>) + Send + Sync + 'static,
{
    hub.subscribe(Selector::field_eq(COMMENTS, "targetId", target_id), move |snapshot| {
        let mut comments = decode_all::<Comment>(&snapshot);
        comments.sort_by(|a, b| {
            b.data
                .created_at
                .cmp(&a.data.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        on_change(comments);
    })
    .await
}

pub async fn subscribe_to_dashboard_stats<F>(
    hub: &LiveQueryHub,
    on_change: F,
) -> Result<MergedSubscription, StoreError>
where
    F: Fn(DashboardStats) + Send + Sync + 'static,
{
    hub.subscribe_merged(
        vec![
            Selector::all(USERS),
            Selector::all(COURSES),
            Selector::all(EXAMS),
            Selector::field_eq(PAYMENTS, "status", Payment::APPROVED),
        ],
        move |sources| on_change(dashboard_stats(&sources)),
    )
    .await
}

pub async fn subscribe_to_advanced_analytics<F>(
    hub: &LiveQueryHub,
    range: TimeRange,
    on_change: F,
) -> Result<MergedSubscription, StoreError>
where
    F: Fn(AdvancedAnalytics) + Send + Sync + 'static,
{
    hub.subscribe_merged(
        vec![Selector::all(PAYMENTS), Selector::all(USERS), Selector::all(EXAMS)],
        move |sources| on_change(advanced_analytics(&sources, range, Utc::now())),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::{DocumentStore, Precondition, WriteOp};
    use crate::realtime::Cancel;
    use crate::services::comments::{CommentService, NewComment};
    use crate::services::retry::RetryPolicy;
    use crate::services::voting::{NewPoll, PollService};
    use crate::utils::session::{Claims, Role};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    /// Drains until `done` holds, failing after two seconds.
    async fn until<T>(rx: &mut mpsc::UnboundedReceiver<T>, done: impl Fn(&T) -> bool) -> T {
        loop {
            let value = recv(rx).await;
            if done(&value) {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn votes_flow_back_through_the_poll_feed() {
        let store = Arc::new(MemoryStore::new());
        let hub = LiveQueryHub::new(store.clone(), RetryPolicy::default());
        let polls = PollService::new(store, RetryPolicy::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = subscribe_to_polls(&hub, move |polls| {
            let _ = tx.send(polls);
        })
        .await
        .unwrap();
        assert!(recv(&mut rx).await.is_empty());

        let poll = polls
            .create_poll(
                NewPoll {
                    title: "Exam date".to_string(),
                    description: String::new(),
                    options: vec!["Mon".to_string(), "Fri".to_string()],
                    duration_days: None,
                },
                "admin",
            )
            .await
            .unwrap();
        polls.cast_vote(&poll.id, "1", "U1").await.unwrap();

        let seen = until(&mut rx, |polls| polls.first().is_some_and(|p| p.data.total_votes == 1)).await;
        assert_eq!(seen[0].data.options[1].vote_count, 1);
        assert!(seen[0].data.counts_consistent());
        sub.cancel();
    }

    #[tokio::test]
    async fn comment_feed_is_filtered_and_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let hub = LiveQueryHub::new(store.clone(), RetryPolicy::default());
        let comments = CommentService::new(store.clone(), RetryPolicy::default());
        let author = Claims {
            sub: "U1".to_string(),
            role: Role::Student,
            exp: usize::MAX,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = subscribe_to_comments(&hub, "lesson-1", move |comments| {
            let _ = tx.send(comments.into_iter().map(|c| c.data.text).collect::<Vec<_>>());
        })
        .await
        .unwrap();
        assert!(recv(&mut rx).await.is_empty());

        for (target, text) in [("lesson-1", "first"), ("lesson-2", "elsewhere"), ("lesson-1", "second")] {
            comments
                .add_comment(
                    target,
                    &author,
                    NewComment {
                        text: text.to_string(),
                        user_name: "Asha".to_string(),
                        parent_id: None,
                    },
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let texts = until(&mut rx, |texts| texts.len() == 2).await;
        assert_eq!(texts, ["second", "first"]);
    }

    #[tokio::test]
    async fn dashboard_stats_track_all_four_sources() {
        let store = Arc::new(MemoryStore::new());
        let hub = LiveQueryHub::new(store.clone(), RetryPolicy::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = subscribe_to_dashboard_stats(&hub, move |stats| {
            let _ = tx.send(stats);
        })
        .await
        .unwrap();
        assert_eq!(recv(&mut rx).await, DashboardStats::default());

        store
            .commit(vec![
                WriteOp::put(USERS, "u1", &json!({ "role": "student" }), Precondition::Absent).unwrap(),
                WriteOp::put(COURSES, "c1", &json!({}), Precondition::Absent).unwrap(),
                WriteOp::put(PAYMENTS, "p1", &json!({ "amount": 250.0, "status": "approved" }), Precondition::Absent).unwrap(),
                WriteOp::put(PAYMENTS, "p2", &json!({ "amount": 999.0, "status": "rejected" }), Precondition::Absent).unwrap(),
            ])
            .await
            .unwrap();

        let stats = until(&mut rx, |stats| {
            stats.total_users == 1 && stats.total_courses == 1 && stats.total_revenue > 0.0
        })
        .await;
        assert_eq!(stats.total_revenue, 250.0);
        assert_eq!(stats.total_exams, 0);
    }

    #[tokio::test]
    async fn advanced_analytics_follow_payments_and_users() {
        let store = Arc::new(MemoryStore::new());
        let hub = LiveQueryHub::new(store.clone(), RetryPolicy::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = subscribe_to_advanced_analytics(&hub, TimeRange::Month, move |analytics| {
            let _ = tx.send(analytics);
        })
        .await
        .unwrap();

        let initial = recv(&mut rx).await;
        assert_eq!(initial.range, TimeRange::Month);
        assert_eq!(initial.overview.total_revenue, 0.0);
        assert_eq!(initial.charts.revenue_trend.len(), crate::aggregator::MONTH_BUCKETS);

        let now = Utc::now().timestamp_millis();
        let long_ago = now - 400 * 24 * 60 * 60 * 1000;
        store
            .commit(vec![
                WriteOp::put(USERS, "u1", &json!({ "role": "student", "joinDate": now }), Precondition::Absent).unwrap(),
                WriteOp::put(USERS, "u2", &json!({ "role": "teacher", "joinDate": now }), Precondition::Absent).unwrap(),
                WriteOp::put(
                    PAYMENTS,
                    "p1",
                    &json!({ "amount": 250.0, "status": "approved", "paymentMethod": "bkash", "submittedAt": now }),
                    Precondition::Absent,
                )
                .unwrap(),
                WriteOp::put(
                    PAYMENTS,
                    "p2",
                    &json!({ "amount": 90.0, "status": "approved", "paymentMethod": "nagad", "submittedAt": long_ago }),
                    Precondition::Absent,
                )
                .unwrap(),
            ])
            .await
            .unwrap();

        let analytics = until(&mut rx, |a| {
            a.overview.total_revenue > 0.0 && a.overview.total_students == 1
        })
        .await;
        assert_eq!(analytics.overview.total_revenue, 250.0);
        assert_eq!(analytics.overview.total_enrollments, 1);
        let methods: Vec<(&str, u64)> = analytics
            .charts
            .payment_methods
            .iter()
            .map(|c| (c.name.as_str(), c.value))
            .collect();
        assert_eq!(methods, [("bkash", 1)]);
    }
}
