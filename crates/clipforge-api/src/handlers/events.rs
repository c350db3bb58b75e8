//! Server-pushed progress streams.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use clipforge_models::{JobId, ProgressEvent};

use crate::auth::AuthPrincipal;
use crate::error::ApiResult;
use crate::state::AppState;

/// GET /jobs/:id/events
///
/// Emits the latest snapshot immediately, then the live tail. Each message
/// carries the event JSON with the per-job `seq` as the SSE id. The stream
/// ends after a terminal event, or when the subscriber lags behind the
/// channel capacity (reconnecting resynchronizes from the snapshot).
pub async fn job_events(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = JobId::from_string(job_id);
    let subscription = state.scheduler.subscribe(&job_id, &principal).await?;

    let snapshot_terminal = subscription
        .snapshot
        .as_ref()
        .map(|e| e.status.is_terminal())
        .unwrap_or(false);

    let snapshot = stream::iter(
        subscription
            .snapshot
            .map(sse_event)
            .into_iter()
            .map(Ok::<_, Infallible>),
    );

    let initial = if snapshot_terminal {
        None
    } else {
        Some(subscription.receiver)
    };
    let tail = stream::unfold(initial, move |receiver| async move {
        let mut receiver = receiver?;
        match receiver.recv().await {
            Ok(event) => {
                let next = if event.status.is_terminal() {
                    None
                } else {
                    Some(receiver)
                };
                Some((Ok(sse_event(event)), next))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "dropping lagged progress subscriber");
                None
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    let stream = snapshot.chain(tail);

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn sse_event(event: ProgressEvent) -> Event {
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.seq.to_string())
        .event("progress")
        .data(data)
}
