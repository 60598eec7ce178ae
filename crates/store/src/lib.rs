//! In-memory conversation directory and message logs.
//!
//! One [`Conversation`] per external chat thread, each with an append-only,
//! arrival-ordered message log. Conversations are created on first reference
//! and never deleted.

pub mod store;
pub mod types;

pub use {
    store::{AppendResult, ConversationStore, MessageOrigin},
    types::{BotMode, ChatSummary, ContentKind, Conversation, ConversationMeta, Message, ParseBotModeError},
};
