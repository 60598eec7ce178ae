use std::sync::Arc;

use {
    banter_protocol::EventFrame,
    tracing::{debug, warn},
};

use crate::state::GatewayState;

/// Broadcast an event to every connected observer.
///
/// Best-effort and non-blocking with respect to the pipeline: frames are
/// queued on each observer's write-loop channel, and an observer whose
/// channel is closed is simply skipped.
pub async fn broadcast(state: &Arc<GatewayState>, event: &str, payload: serde_json::Value) {
    let seq = state.next_seq();
    let frame = EventFrame::new(event, payload, seq);
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(event, "failed to serialize broadcast event: {e}");
            return;
        },
    };

    let clients = state.clients.read().await;
    debug!(event, seq, clients = clients.len(), "broadcasting event");
    for client in clients.values() {
        if !client.send(&json) {
            debug!(conn_id = %client.conn_id, event, "skipping unreachable observer");
        }
    }
}
