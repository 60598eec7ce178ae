use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use banter_store::ConversationMeta;

// ── Typed transport events ───────────────────────────────────────────────────

/// Why the transport link closed. `logged_out` marks the terminal case that
/// requires fresh pairing; everything else is treated as transient.
#[derive(Debug, Clone, Default)]
pub struct DisconnectReason {
    pub code: Option<String>,
    pub logged_out: bool,
}

/// Remote media attached to an inbound message.
#[derive(Debug, Clone)]
pub struct RawMedia {
    pub url: String,
    pub mime_type: String,
}

/// An inbound message before normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_name: Option<String>,
    pub from_self: bool,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// Body text or media caption. May be empty.
    pub body: String,
    pub media: Option<RawMedia>,
    /// Payload the transport recognized but cannot render (polls, reactions).
    pub unsupported: bool,
}

/// Uniform event sequence produced by a transport session, replacing the
/// underlying library's disparate callbacks.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// No stored credentials: pairing is required before the link opens.
    PairingChallenge { challenge: String },
    /// The authenticated link is up.
    Opened,
    /// The link closed.
    Closed { reason: DisconnectReason },
    /// Bulk delivery of historical conversations and their messages.
    HistorySync {
        conversations: Vec<ConversationMeta>,
        messages: Vec<RawMessage>,
    },
    MessageReceived(RawMessage),
}

// ── Transport seam ───────────────────────────────────────────────────────────

/// Outbound half of a live transport session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()>;
}

/// A connectable transport session. One `connect` yields the outbound handle
/// and the typed event sequence for that session's lifetime; the channel
/// closing means the session is gone.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
    ) -> anyhow::Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)>;
}
