use std::sync::Arc;

use {
    async_trait::async_trait,
    banter_protocol::events,
    banter_session::{SessionEvent, SessionEventSink},
};

use crate::{broadcast::broadcast, state::GatewayState};

/// Maps supervisor events onto broadcast frames for all observers.
pub struct GatewaySessionSink {
    state: Arc<GatewayState>,
}

impl GatewaySessionSink {
    pub fn from_state(state: Arc<GatewayState>) -> Arc<dyn SessionEventSink> {
        Arc::new(Self { state })
    }
}

#[async_trait]
impl SessionEventSink for GatewaySessionSink {
    async fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::PairingRequired { challenge } => {
                broadcast(
                    &self.state,
                    events::SESSION_PAIRING,
                    serde_json::json!({ "challenge": challenge }),
                )
                .await;
            },
            SessionEvent::Connected => {
                broadcast(&self.state, events::SESSION_CONNECTED, serde_json::json!({})).await;
            },
            SessionEvent::ConnectionLost => {
                broadcast(&self.state, events::SESSION_LOST, serde_json::json!({})).await;
            },
            SessionEvent::DirectoryUpdated => {
                broadcast(
                    &self.state,
                    events::CHAT_LIST,
                    serde_json::json!({ "chats": self.state.store.summaries() }),
                )
                .await;
            },
            SessionEvent::MessageAppended { message } => {
                broadcast(
                    &self.state,
                    events::CHAT_MESSAGE,
                    serde_json::json!({
                        "conversationId": message.conversation_id,
                        "message": message,
                    }),
                )
                .await;
            },
        }
    }
}
