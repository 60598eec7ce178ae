use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ── Message content ──────────────────────────────────────────────────────────

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Media,
    /// Recognized but unrenderable payload (reactions, polls, protocol noise).
    Unsupported,
}

/// One unit of conversation content.
///
/// Immutable once appended; media materialization happens before the append,
/// so `media_inline`/`media_failed` are settled by the time observers see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub conversation_id: String,
    pub message_id: String,
    pub from_self: bool,
    /// Unix epoch milliseconds as reported by the transport.
    pub timestamp: i64,
    pub kind: ContentKind,
    /// Body text, or the caption for media messages. May be empty.
    pub text: String,
    /// Inline `data:<mime>;base64,...` payload when materialization succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_inline: Option<String>,
    /// Set when a media fetch was attempted and failed; the message stays
    /// visible with this flag instead of being dropped.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub media_failed: bool,
}

// ── Conversations ────────────────────────────────────────────────────────────

/// Directory metadata for a conversation, as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub unread_count: u32,
}

/// One external chat thread with its arrival-ordered message log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub display_name: String,
    pub unread_count: u32,
    pub messages: Vec<Message>,
    /// Message ids already appended, for idempotent replays.
    #[serde(skip)]
    pub(crate) seen: HashSet<String>,
}

impl Conversation {
    pub fn new(meta: ConversationMeta) -> Self {
        Self {
            id: meta.id,
            display_name: meta.display_name,
            unread_count: meta.unread_count,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Directory summary for observer previews: metadata plus the last message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub display_name: String,
    pub unread_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
}

// ── Bot mode ─────────────────────────────────────────────────────────────────

/// Global switch controlling whether automatic replies are considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Auto,
    Manual,
    Off,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Auto => "auto",
            BotMode::Manual => "manual",
            BotMode::Off => "off",
        }
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown bot mode: {0}")]
pub struct ParseBotModeError(pub String);

impl FromStr for BotMode {
    type Err = ParseBotModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BotMode::Auto),
            "manual" => Ok(BotMode::Manual),
            "off" => Ok(BotMode::Off),
            other => Err(ParseBotModeError(other.to_string())),
        }
    }
}
