use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::aggregator::dashboard::{AdvancedAnalytics, TimeRange};
use crate::db::store::StoreError;
use crate::realtime::feeds::subscribe_to_advanced_analytics;
use crate::realtime::{Health, SubscriptionManager};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub range: TimeRange,
}

/// Client message switching the analytics window, e.g. `{"range":"30d"}`.
#[derive(Debug, Deserialize)]
struct RangeRequest {
    range: TimeRange,
}

type Tagged = (u64, AdvancedAnalytics);

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub async fn analytics_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Response {
    ws.on_upgrade(move |socket| run_analytics_socket(socket, state, query.range))
}

async fn run_analytics_socket(socket: WebSocket, state: AppState, initial: TimeRange) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Tagged>();
    let manager = SubscriptionManager::new();

    if let Err(e) = open_range(&manager, &state, &tx, initial).await {
        error!("Failed to open analytics subscription: {}", e);
        let _ = sender.send(Message::Text(unavailable())).await;
        return;
    }

    let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<RangeRequest>(&text) {
                        Ok(request) => match open_range(&manager, &state, &tx, request.range).await {
                            Ok(_) => None,
                            Err(e) => {
                                warn!("Failed to switch analytics range: {}", e);
                                Some(unavailable())
                            }
                        },
                        Err(_) => Some(
                            json!({
                                "error": "BAD_REQUEST",
                                "message": "Expected {\"range\": \"7d\" | \"30d\" | \"90d\" | \"all\"}"
                            })
                            .to_string(),
                        ),
                    };
                    if let Some(reply) = reply {
                        if sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            Some(tagged) = rx.recv() => {
                let Some(payload) = current_payload(&manager, tagged).await else {
                    continue;
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            _ = health_check.tick() => {
                if manager.health().await == Some(Health::Failed) {
                    warn!("Analytics subscription failed, closing socket");
                    let _ = sender.send(Message::Text(unavailable())).await;
                    break;
                }
            }
        }
    }

    manager.teardown().await;
    debug!("analytics socket closed");
}

/// Serialized update, or `None` when it was queued by a set that has since
/// been replaced.
async fn current_payload(
    manager: &SubscriptionManager<TimeRange>,
    (generation, analytics): Tagged,
) -> Option<String> {
    if manager.current().await.map(|(_, current)| current) != Some(generation) {
        return None;
    }
    match serde_json::to_string(&analytics) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("Failed to serialize analytics: {}", e);
            None
        }
    }
}

async fn open_range(
    manager: &SubscriptionManager<TimeRange>,
    state: &AppState,
    tx: &mpsc::UnboundedSender<Tagged>,
    range: TimeRange,
) -> Result<u64, StoreError> {
    let hub = state.hub.clone();
    let tx = tx.clone();
    manager
        .switch(range, move |range, generation| async move {
            subscribe_to_advanced_analytics(&hub, range, move |analytics| {
                let _ = tx.send((generation, analytics));
            })
            .await
        })
        .await
}

fn unavailable() -> String {
    json!({
        "error": "SERVICE_UNAVAILABLE",
        "message": "Live analytics are unavailable"
    })
    .to_string()
}
