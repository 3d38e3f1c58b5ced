use crate::AppState;
use axum::response::sse::{Event, KeepAlive, Sse};
use csrsign_core::{GroupVersionKind, ResourceEvent, WatchEventType};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

/// Query parameters for list/watch requests
#[derive(Debug, Deserialize, Default)]
pub struct WatchParams {
    /// Set to "true" or "1" to enable watch mode
    pub watch: Option<String>,
}

impl WatchParams {
    /// Check if this is a watch request
    pub fn is_watch(&self) -> bool {
        self.watch
            .as_deref()
            .is_some_and(|v| v == "true" || v == "1")
    }
}

/// Kubernetes wire-format watch event
#[derive(Serialize)]
struct WireWatchEvent<'a> {
    #[serde(rename = "type")]
    event_type: WatchEventType,
    object: &'a serde_json::Value,
}

/// SSE stream of events for one kind
pub fn watch_resource_stream(
    state: &Arc<AppState>,
    gvk: GroupVersionKind,
) -> Sse<impl futures_util::Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.subscribe());

    let filtered = stream.filter_map(
        move |result: std::result::Result<ResourceEvent, BroadcastStreamRecvError>| {
            let gvk = gvk.clone();
            async move {
                let event = match result {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "Watch client lagged behind, events dropped");
                        return None;
                    }
                };

                if event.gvk != gvk {
                    return None;
                }

                let wire = WireWatchEvent {
                    event_type: event.event_type,
                    object: &event.object,
                };
                let data = serde_json::to_string(&wire).ok()?;
                Some(Ok(Event::default().data(data)))
            }
        },
    );

    Sse::new(filtered).keep_alive(KeepAlive::default())
}
