use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{State, WebSocketUpgrade},
        response::Response,
        routing::get,
    },
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use banter_protocol::PROTOCOL_VERSION;

use crate::{state::GatewayState, ws};

pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "protocol": PROTOCOL_VERSION }))
}

async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state))
}

/// Serve the gateway until the cancellation token fires.
pub async fn serve(
    state: Arc<GatewayState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
