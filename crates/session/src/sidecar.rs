//! JSON-over-WebSocket adapter for the external protocol sidecar process.
//!
//! The sidecar owns the wire protocol, pairing cryptography, and credential
//! storage; this adapter only translates its frames into the typed
//! [`TransportEvent`] sequence and correlates send acknowledgements.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage},
    tracing::{debug, info, warn},
};

use banter_store::ConversationMeta;

use crate::transport::{
    DisconnectReason, RawMedia, RawMessage, Transport, TransportEvent, TransportHandle,
};

pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:3917";

const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(15);

// ── Wire frames ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Login { auth_dir: Option<String> },
    #[serde(rename_all = "camelCase")]
    SendText {
        request_id: String,
        conversation_id: String,
        text: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    unread_count: u32,
}

impl From<WireConversation> for ConversationMeta {
    fn from(wire: WireConversation) -> Self {
        let display_name = wire.name.unwrap_or_else(|| wire.id.clone());
        Self {
            id: wire.id,
            display_name,
            unread_count: wire.unread_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    conversation_id: String,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    from_self: bool,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    body: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    media_mime: Option<String>,
    #[serde(default)]
    unsupported: bool,
}

impl From<WireMessage> for RawMessage {
    fn from(wire: WireMessage) -> Self {
        let media = match (wire.media_url, wire.media_mime) {
            (Some(url), Some(mime_type)) => Some(RawMedia { url, mime_type }),
            _ => None,
        };
        Self {
            message_id: wire.message_id,
            conversation_id: wire.conversation_id,
            sender_name: wire.sender_name,
            from_self: wire.from_self,
            timestamp: wire.timestamp,
            body: wire.body,
            media,
            unsupported: wire.unsupported,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SidecarEvent {
    PairingChallenge {
        challenge: String,
    },
    Opened,
    #[serde(rename_all = "camelCase")]
    Closed {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        logged_out: bool,
    },
    History {
        #[serde(default)]
        conversations: Vec<WireConversation>,
        #[serde(default)]
        messages: Vec<WireMessage>,
    },
    Message {
        #[serde(flatten)]
        message: WireMessage,
    },
    #[serde(rename_all = "camelCase")]
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

// ── Transport implementation ─────────────────────────────────────────────────

type PendingSends = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Transport session backed by the sidecar's WebSocket endpoint.
pub struct SidecarTransport {
    url: String,
    auth_dir: Option<String>,
}

impl SidecarTransport {
    pub fn new(url: impl Into<String>, auth_dir: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_dir,
        }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn connect(
        &self,
    ) -> anyhow::Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "connected to transport sidecar");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        let pending: PendingSends = Arc::new(Mutex::new(HashMap::new()));

        // Log in with whatever credentials the sidecar has stored; a missing
        // credential set comes back as a pairing challenge event.
        let login = serde_json::to_string(&ClientFrame::Login {
            auth_dir: self.auth_dir.clone(),
        })?;
        let _ = out_tx.send(login).await;

        // Write loop: serialized frames → socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                    debug!("sidecar write loop closed");
                    break;
                }
            }
        });

        // Read loop: socket → typed events, send acks resolved in place.
        let read_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(t)) => t.to_string(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "sidecar socket read failed");
                        break;
                    },
                };
                let event: SidecarEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed sidecar frame");
                        continue;
                    },
                };
                let mapped = match event {
                    SidecarEvent::SendResult {
                        request_id,
                        success,
                        error,
                    } => {
                        let waiter = read_pending.lock().unwrap().remove(&request_id);
                        if let Some(tx) = waiter {
                            let result = if success {
                                Ok(())
                            } else {
                                Err(error.unwrap_or_else(|| "send failed".into()))
                            };
                            let _ = tx.send(result);
                        }
                        continue;
                    },
                    SidecarEvent::PairingChallenge { challenge } => {
                        TransportEvent::PairingChallenge { challenge }
                    },
                    SidecarEvent::Opened => TransportEvent::Opened,
                    SidecarEvent::Closed { code, logged_out } => TransportEvent::Closed {
                        reason: DisconnectReason { code, logged_out },
                    },
                    SidecarEvent::History {
                        conversations,
                        messages,
                    } => TransportEvent::HistorySync {
                        conversations: conversations.into_iter().map(Into::into).collect(),
                        messages: messages.into_iter().map(Into::into).collect(),
                    },
                    SidecarEvent::Message { message } => {
                        TransportEvent::MessageReceived(message.into())
                    },
                };
                if event_tx.send(mapped).await.is_err() {
                    break;
                }
            }
            // Dropping event_tx closes the supervisor's event stream, which
            // classifies an unannounced socket loss as transient.
        });

        let handle = Arc::new(SidecarHandle {
            out_tx,
            pending,
            ack_timeout: SEND_ACK_TIMEOUT,
        });
        Ok((handle as Arc<dyn TransportHandle>, event_rx))
    }
}

struct SidecarHandle {
    out_tx: mpsc::Sender<String>,
    pending: PendingSends,
    ack_timeout: Duration,
}

#[async_trait]
impl TransportHandle for SidecarHandle {
    async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), tx);

        let frame = serde_json::to_string(&ClientFrame::SendText {
            request_id: request_id.clone(),
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        })?;
        if self.out_tx.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&request_id);
            anyhow::bail!("transport session is closed");
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => anyhow::bail!("send rejected: {message}"),
            Ok(Err(_)) => anyhow::bail!("transport session closed before acknowledging send"),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                anyhow::bail!("timed out waiting for send acknowledgement")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn login_frame_serializes_with_op_tag() {
        let frame = ClientFrame::Login {
            auth_dir: Some("/var/lib/banter/auth".into()),
        };
        let val = serde_json::to_value(&frame).unwrap();
        assert_eq!(val["op"], "login");
        assert_eq!(val["authDir"], "/var/lib/banter/auth");
    }

    #[test]
    fn send_frame_carries_request_correlation_id() {
        let frame = ClientFrame::SendText {
            request_id: "r1".into(),
            conversation_id: "c1".into(),
            text: "hi".into(),
        };
        let val = serde_json::to_value(&frame).unwrap();
        assert_eq!(val["op"], "send_text");
        assert_eq!(val["requestId"], "r1");
        assert_eq!(val["conversationId"], "c1");
        assert_eq!(val["text"], "hi");
    }

    #[test]
    fn parses_pairing_challenge_event() {
        let event: SidecarEvent =
            serde_json::from_str(r#"{"event":"pairing_challenge","challenge":"qr-blob"}"#).unwrap();
        assert!(matches!(
            event,
            SidecarEvent::PairingChallenge { challenge } if challenge == "qr-blob"
        ));
    }

    #[test]
    fn parses_closed_event_with_logout_flag() {
        let event: SidecarEvent = serde_json::from_str(
            r#"{"event":"closed","code":"401","loggedOut":true}"#,
        )
        .unwrap();
        match event {
            SidecarEvent::Closed { code, logged_out } => {
                assert_eq!(code.as_deref(), Some("401"));
                assert!(logged_out);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn closed_event_defaults_to_transient() {
        let event: SidecarEvent = serde_json::from_str(r#"{"event":"closed"}"#).unwrap();
        assert!(matches!(
            event,
            SidecarEvent::Closed { code: None, logged_out: false }
        ));
    }

    #[test]
    fn parses_inbound_message_with_media_reference() {
        let event: SidecarEvent = serde_json::from_str(
            r#"{
                "event": "message",
                "messageId": "m1",
                "conversationId": "c1",
                "senderName": "Ada",
                "fromSelf": false,
                "timestamp": 1700000000000,
                "body": "look",
                "mediaUrl": "https://cdn/x",
                "mediaMime": "image/png"
            }"#,
        )
        .unwrap();
        let SidecarEvent::Message { message } = event else {
            panic!("expected message event");
        };
        let raw: RawMessage = message.into();
        assert_eq!(raw.message_id, "m1");
        assert_eq!(raw.sender_name.as_deref(), Some("Ada"));
        let media = raw.media.unwrap();
        assert_eq!(media.url, "https://cdn/x");
        assert_eq!(media.mime_type, "image/png");
    }

    #[test]
    fn message_without_mime_maps_to_no_media() {
        let wire = WireMessage {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            sender_name: None,
            from_self: false,
            timestamp: 0,
            body: String::new(),
            media_url: Some("https://cdn/x".into()),
            media_mime: None,
            unsupported: false,
        };
        let raw: RawMessage = wire.into();
        assert!(raw.media.is_none());
    }

    #[test]
    fn history_event_maps_conversation_names() {
        let event: SidecarEvent = serde_json::from_str(
            r#"{
                "event": "history",
                "conversations": [
                    {"id": "c1", "name": "Ada", "unreadCount": 2},
                    {"id": "c2"}
                ],
                "messages": []
            }"#,
        )
        .unwrap();
        let SidecarEvent::History { conversations, .. } = event else {
            panic!("expected history event");
        };
        let metas: Vec<ConversationMeta> = conversations.into_iter().map(Into::into).collect();
        assert_eq!(metas[0].display_name, "Ada");
        assert_eq!(metas[0].unread_count, 2);
        // Nameless conversations fall back to their id.
        assert_eq!(metas[1].display_name, "c2");
        assert_eq!(metas[1].unread_count, 0);
    }

    #[test]
    fn unknown_event_tags_fail_parsing() {
        let result = serde_json::from_str::<SidecarEvent>(r#"{"event":"reaction","x":1}"#);
        assert!(result.is_err());
    }
}
