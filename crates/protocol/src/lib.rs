//! Observer WebSocket protocol definitions.
//!
//! All observer traffic is JSON frames over one WebSocket:
//! - `RequestFrame`  — observer → gateway command
//! - `ResponseFrame` — gateway → observer direct reply
//! - `EventFrame`    — gateway → observer broadcast push
//!
//! The first request on a connection must be `connect`; the reply carries a
//! [`Hello`] payload with a state snapshot so observers render immediately.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KB
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s

// ── Command and event taxonomy ───────────────────────────────────────────────

pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const CHAT_HISTORY: &str = "chat.history";
    pub const CHAT_SEND: &str = "chat.send";
    pub const CHAT_TYPING: &str = "chat.typing";
    pub const BOT_MODE_SET: &str = "bot.mode.set";
    pub const ASSIST_STREAM: &str = "assist.stream";

    pub fn all() -> Vec<String> {
        [CONNECT, CHAT_HISTORY, CHAT_SEND, CHAT_TYPING, BOT_MODE_SET, ASSIST_STREAM]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

pub mod events {
    pub const SESSION_PAIRING: &str = "session.pairing";
    pub const SESSION_CONNECTED: &str = "session.connected";
    pub const SESSION_LOST: &str = "session.lost";
    pub const CHAT_LIST: &str = "chat.list";
    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const ASSIST_CHUNK: &str = "assist.chunk";
    pub const ASSIST_END: &str = "assist.end";
    pub const BOT_MODE: &str = "bot.mode";

    pub fn all() -> Vec<String> {
        [
            SESSION_PAIRING,
            SESSION_CONNECTED,
            SESSION_LOST,
            CHAT_LIST,
            CHAT_MESSAGE,
            ASSIST_CHUNK,
            ASSIST_END,
            BOT_MODE,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const SEND_FAILED: &str = "SEND_FAILED";
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Observer → gateway command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Gateway → observer direct reply, answering exactly one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub r#type: String, // always "res"
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Gateway → observer broadcast push, ordered by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub r#type: String, // always "event"
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub seq: u64,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            r#type: "event".into(),
            event: event.into(),
            payload: Some(payload),
            seq,
        }
    }
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters of the initial `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(default)]
    pub version: String,
}

/// Handshake reply payload: server identity, capabilities, and the state
/// snapshot (conversation directory + bot mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: Features,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "connId")]
    pub conn_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn request_frame_round_trips() {
        let frame = RequestFrame::new("1", methods::CHAT_SEND, Some(serde_json::json!({
            "conversationId": "c1",
            "text": "hi",
        })));
        let json = serde_json::to_string(&frame).unwrap();
        let back: RequestFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.r#type, "req");
        assert_eq!(back.method, "chat.send");
        assert_eq!(back.params.unwrap()["conversationId"], "c1");
    }

    #[test]
    fn ok_response_has_payload_and_no_error() {
        let frame = ResponseFrame::ok("7", serde_json::json!({"done": true}));
        let val = serde_json::to_value(&frame).unwrap();
        assert_eq!(val["type"], "res");
        assert_eq!(val["ok"], true);
        assert_eq!(val["payload"]["done"], true);
        assert!(val.get("error").is_none());
    }

    #[test]
    fn err_response_has_error_and_no_payload() {
        let frame = ResponseFrame::err("7", ErrorShape::new(error_codes::UNAVAILABLE, "not up"));
        let val = serde_json::to_value(&frame).unwrap();
        assert_eq!(val["ok"], false);
        assert_eq!(val["error"]["code"], "UNAVAILABLE");
        assert!(val.get("payload").is_none());
    }

    #[test]
    fn event_frame_carries_sequence_number() {
        let frame = EventFrame::new(events::CHAT_MESSAGE, serde_json::json!({"x": 1}), 42);
        let val = serde_json::to_value(&frame).unwrap();
        assert_eq!(val["type"], "event");
        assert_eq!(val["event"], "chat.message");
        assert_eq!(val["seq"], 42);
    }

    #[test]
    fn connect_params_accept_minimal_client() {
        let params: ConnectParams =
            serde_json::from_str(r#"{"minProtocol":1,"maxProtocol":1}"#).unwrap();
        assert_eq!(params.min_protocol, 1);
        assert!(params.client.is_none());
    }

    #[test]
    fn taxonomy_lists_are_complete_and_unique() {
        for list in [methods::all(), events::all()] {
            let mut sorted = list.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), list.len());
        }
        assert!(methods::all().contains(&"connect".to_string()));
        assert!(events::all().contains(&"assist.chunk".to_string()));
    }
}
