use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::realtime::{Health, Live};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct StreamState<T, H> {
    updates: mpsc::UnboundedReceiver<T>,
    handle: H,
    finished: bool,
}

/// Turns a live subscription into an SSE response. `handle` lives as long
/// as the stream, so a disconnecting client cancels the subscription.
/// A subscription that fails permanently gets one `error` event and the
/// stream ends.
pub fn sse_from_subscription<T, H>(
    updates: mpsc::UnboundedReceiver<T>,
    handle: H,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
    H: Live + 'static,
{
    let initial = StreamState {
        updates,
        handle,
        finished: false,
    };

    let stream = stream::unfold(initial, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            tokio::select! {
                update = state.updates.recv() => {
                    let Some(update) = update else {
                        // The sender goes away when a single-source subscription gives up.
                        state.finished = true;
                        return if state.handle.health() == Health::Failed {
                            warn!("Live subscription failed, closing stream");
                            Some((Ok(failure_event()), state))
                        } else {
                            None
                        };
                    };
                    let event = match serde_json::to_string(&update) {
                        Ok(json_data) => Event::default().data(json_data),
                        Err(e) => {
                            error!("Failed to serialize live update: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok::<_, Infallible>(event), state));
                }
                _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {
                    if state.handle.health() == Health::Failed {
                        warn!("Live subscription failed, closing stream");
                        state.finished = true;
                        return Some((Ok(failure_event()), state));
                    }
                }
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn failure_event() -> Event {
    Event::default()
        .event("error")
        .data(r#"{"error":"SERVICE_UNAVAILABLE","message":"Live updates are unavailable"}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::FlakyStore;
    use crate::db::store::Selector;
    use crate::realtime::LiveQueryHub;
    use crate::services::retry::RetryPolicy;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn flaky() -> (Arc<FlakyStore>, LiveQueryHub) {
        let store = Arc::new(FlakyStore::default());
        let hub = LiveQueryHub::new(
            store.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        );
        (store, hub)
    }

    async fn body_text<S>(sse: Sse<S>) -> String
    where
        S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
    {
        let body = sse.into_response().into_body();
        let bytes = timeout(Duration::from_secs(5), to_bytes(body, usize::MAX))
            .await
            .expect("stream did not end")
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn failed_subscription_ends_with_an_error_event() {
        let (store, hub) = flaky();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = hub
            .subscribe(Selector::all("polls"), move |snapshot| {
                let _ = tx.send(snapshot.len());
            })
            .await
            .unwrap();
        let sse = sse_from_subscription(rx, subscription);

        store.fail("polls");

        let text = body_text(sse).await;
        assert!(text.contains("data: 0"), "{}", text);
        assert!(text.contains("event: error"), "{}", text);
        assert!(text.contains("SERVICE_UNAVAILABLE"), "{}", text);
    }

    #[tokio::test]
    async fn one_failed_source_ends_a_merged_stream() {
        let (store, hub) = flaky();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = hub
            .subscribe_merged(
                vec![Selector::all("polls"), Selector::all("users")],
                move |sources| {
                    let _ = tx.send(sources.len("polls"));
                },
            )
            .await
            .unwrap();
        let sse = sse_from_subscription(rx, subscription);

        store.fail("polls");

        let text = body_text(sse).await;
        assert!(text.contains("event: error"), "{}", text);
    }
}
