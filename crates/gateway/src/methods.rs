use std::sync::Arc;

use {
    serde::Deserialize,
    tracing::{info, warn},
};

use {
    banter_auto_reply::FALLBACK_REPLY,
    banter_llm::collect_stream,
    banter_protocol::{ErrorShape, RequestFrame, ResponseFrame, error_codes, events, methods},
    banter_store::BotMode,
};

use crate::{broadcast::broadcast, state::GatewayState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationParams {
    conversation_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    conversation_id: String,
    text: String,
}

#[derive(Deserialize)]
struct ModeParams {
    mode: String,
}

fn invalid(id: &str, message: impl std::fmt::Display) -> ResponseFrame {
    ResponseFrame::err(
        id,
        ErrorShape::new(error_codes::INVALID_REQUEST, message.to_string()),
    )
}

/// Dispatch one observer command and produce its direct reply. Broadcasts
/// triggered along the way go to every observer; the response goes only to
/// the requester.
pub async fn dispatch(state: &Arc<GatewayState>, req: RequestFrame) -> ResponseFrame {
    let params = req.params.unwrap_or(serde_json::Value::Null);
    match req.method.as_str() {
        methods::CHAT_HISTORY => {
            let params: ConversationParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid(&req.id, e),
            };
            // Unknown conversations answer with an empty log rather than an
            // error, so observers can ask eagerly.
            let messages = state.store.history(&params.conversation_id).unwrap_or_default();
            ResponseFrame::ok(&req.id, serde_json::json!({
                "conversationId": params.conversation_id,
                "messages": messages,
            }))
        },

        methods::CHAT_SEND => {
            let params: SendParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid(&req.id, e),
            };
            // A manual send always clears the conversation's pending
            // automatic reply before anything touches the wire.
            state.engine.cancel(&params.conversation_id);

            let Some(supervisor) = state.supervisor() else {
                return ResponseFrame::err(
                    &req.id,
                    ErrorShape::new(error_codes::UNAVAILABLE, "messaging session not started"),
                );
            };
            match supervisor.send_text(&params.conversation_id, &params.text).await {
                Ok(()) => ResponseFrame::ok(&req.id, serde_json::json!({ "sent": true })),
                Err(e) => {
                    warn!(conversation_id = %params.conversation_id, error = %e, "manual send failed");
                    ResponseFrame::err(
                        &req.id,
                        ErrorShape::new(error_codes::SEND_FAILED, e.to_string()),
                    )
                },
            }
        },

        methods::CHAT_TYPING => {
            let params: ConversationParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid(&req.id, e),
            };
            let cancelled = state.engine.cancel(&params.conversation_id);
            ResponseFrame::ok(&req.id, serde_json::json!({ "cancelled": cancelled }))
        },

        methods::BOT_MODE_SET => {
            let params: ModeParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid(&req.id, e),
            };
            let mode: BotMode = match params.mode.parse() {
                Ok(m) => m,
                Err(e) => return invalid(&req.id, e),
            };
            state.engine.set_mode(mode);
            broadcast(state, events::BOT_MODE, serde_json::json!({ "mode": mode })).await;
            ResponseFrame::ok(&req.id, serde_json::json!({ "mode": mode }))
        },

        methods::ASSIST_STREAM => {
            let params: SendParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid(&req.id, e),
            };
            let text = assist_stream(state, &params.conversation_id, &params.text).await;

            let Some(supervisor) = state.supervisor() else {
                return ResponseFrame::err(
                    &req.id,
                    ErrorShape::new(error_codes::UNAVAILABLE, "messaging session not started"),
                );
            };
            match supervisor.send_text(&params.conversation_id, &text).await {
                Ok(()) => ResponseFrame::ok(&req.id, serde_json::json!({ "text": text })),
                Err(e) => {
                    warn!(conversation_id = %params.conversation_id, error = %e, "assisted send failed");
                    ResponseFrame::err(
                        &req.id,
                        ErrorShape::new(error_codes::SEND_FAILED, e.to_string()),
                    )
                },
            }
        },

        other => {
            warn!(method = other, "unknown observer method");
            ResponseFrame::err(
                &req.id,
                ErrorShape::new(error_codes::UNKNOWN_METHOD, format!("unknown method: {other}")),
            )
        },
    }
}

/// Run a streaming generation, relaying each chunk to all observers, and
/// return the aggregated text (or the fallback reply on backend failure).
async fn assist_stream(state: &Arc<GatewayState>, conversation_id: &str, prompt: &str) -> String {
    info!(conversation_id, "streaming assisted reply");
    let stream = state.provider.stream(prompt.to_string());
    let result = collect_stream(stream, |chunk| {
        let state = Arc::clone(state);
        let conversation_id = conversation_id.to_string();
        async move {
            broadcast(&state, events::ASSIST_CHUNK, serde_json::json!({
                "conversationId": conversation_id,
                "chunk": chunk,
            }))
            .await;
        }
    })
    .await;

    broadcast(state, events::ASSIST_END, serde_json::json!({
        "conversationId": conversation_id,
    }))
    .await;

    match result {
        Ok(full) => full,
        Err(e) => {
            warn!(conversation_id, error = %e, "assisted generation failed");
            FALLBACK_REPLY.to_string()
        },
    }
}
