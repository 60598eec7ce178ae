use std::{sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use banter_protocol::{
    ConnectParams, ErrorShape, EventFrame, Features, HANDSHAKE_TIMEOUT_MS, Hello,
    MAX_PAYLOAD_BYTES, PROTOCOL_VERSION, RequestFrame, ResponseFrame, ServerInfo, error_codes,
    events, methods,
};

use crate::{
    methods::dispatch,
    state::{ConnectedClient, GatewayState},
};

/// Handle one observer connection through its full lifecycle:
/// handshake → command loop → cleanup.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "ws: new observer connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forwards frames from the client channel to the socket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    // ── Handshake phase ──────────────────────────────────────────────────

    let connect_result = match tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_connect(&mut ws_rx),
    )
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(conn_id = %conn_id, error = %e, "ws: handshake failed");
            drop(client_tx);
            write_handle.abort();
            return;
        },
        Err(_) => {
            warn!(conn_id = %conn_id, "ws: handshake timeout");
            drop(client_tx);
            write_handle.abort();
            return;
        },
    };

    let (request_id, params) = connect_result;

    if params.min_protocol > PROTOCOL_VERSION || params.max_protocol < PROTOCOL_VERSION {
        let err = ResponseFrame::err(
            &request_id,
            ErrorShape::new(
                error_codes::INVALID_REQUEST,
                format!(
                    "protocol mismatch: server={}, client={}-{}",
                    PROTOCOL_VERSION, params.min_protocol, params.max_protocol
                ),
            ),
        );
        let _ = client_tx.send(serde_json::to_string(&err).unwrap_or_default());
        // Dropping the channel lets the write loop flush the rejection
        // before it exits.
        drop(client_tx);
        return;
    }

    let hello = Hello {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            version: state.version.clone(),
            host: Some(state.hostname.clone()),
            conn_id: conn_id.clone(),
        },
        features: Features {
            methods: methods::all(),
            events: events::all(),
        },
        snapshot: state.snapshot(),
    };
    let resp = ResponseFrame::ok(&request_id, serde_json::to_value(&hello).unwrap_or_default());
    let _ = client_tx.send(serde_json::to_string(&resp).unwrap_or_default());

    info!(
        conn_id = %conn_id,
        client_id = params.client.as_ref().map(|c| c.id.as_str()).unwrap_or("anonymous"),
        "ws: handshake complete"
    );

    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            sender: client_tx.clone(),
            connected_at: Instant::now(),
        })
        .await;

    // ── Command loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            let err = EventFrame::new(
                "error",
                serde_json::json!({ "message": "payload too large", "maxBytes": MAX_PAYLOAD_BYTES }),
                state.next_seq(),
            );
            let _ = client_tx.send(serde_json::to_string(&err).unwrap_or_default());
            continue;
        }

        let frame: RequestFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                let err = EventFrame::new(
                    "error",
                    serde_json::json!({ "message": "invalid frame" }),
                    state.next_seq(),
                );
                let _ = client_tx.send(serde_json::to_string(&err).unwrap_or_default());
                continue;
            },
        };
        if frame.r#type != "req" {
            debug!(conn_id = %conn_id, "ws: ignoring non-request frame");
            continue;
        }

        let response = dispatch(&state, frame).await;
        let _ = client_tx.send(serde_json::to_string(&response).unwrap_or_default());
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    let duration = state
        .remove_client(&conn_id)
        .await
        .map(|c| c.connected_at.elapsed())
        .unwrap_or_default();

    info!(
        conn_id = %conn_id,
        duration_secs = duration.as_secs(),
        "ws: observer disconnected"
    );

    drop(client_tx);
    write_handle.abort();
}

/// Wait for the first `connect` request frame.
async fn wait_for_connect(
    rx: &mut futures::stream::SplitStream<WebSocket>,
) -> anyhow::Result<(String, ConnectParams)> {
    while let Some(msg) = rx.next().await {
        let text = match msg? {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => anyhow::bail!("connection closed before handshake"),
            _ => continue,
        };

        let frame: RequestFrame = serde_json::from_str(&text)?;
        if frame.method != methods::CONNECT {
            anyhow::bail!("first message must be 'connect', got '{}'", frame.method);
        }
        let params: ConnectParams =
            serde_json::from_value(frame.params.unwrap_or(serde_json::Value::Null))?;
        return Ok((frame.id, params));
    }
    anyhow::bail!("connection closed before handshake")
}
