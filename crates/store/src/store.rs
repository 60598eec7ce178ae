use dashmap::DashMap;

use crate::types::{ChatSummary, Conversation, ConversationMeta, Message};

/// Where an appended message came from. Live inbound traffic bumps the
/// unread counter; replayed history does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Live,
    History,
}

/// Outcome of an append, for callers that broadcast state changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendResult {
    /// False when the message id was already present (idempotent replay).
    pub appended: bool,
    /// True when the append created the conversation.
    pub new_conversation: bool,
}

/// Process-wide directory of conversations, sharded by conversation id.
///
/// All mutation goes through `&self` methods; per-key locking comes from the
/// map's shards, so writers on different conversations never contend.
#[derive(Default)]
pub struct ConversationStore {
    conversations: DashMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a conversation if absent. Existing conversations are never
    /// overwritten, so a replayed bulk load leaves metadata untouched.
    pub fn merge_conversation(&self, meta: ConversationMeta) -> bool {
        let mut inserted = false;
        self.conversations.entry(meta.id.clone()).or_insert_with(|| {
            inserted = true;
            Conversation::new(meta)
        });
        inserted
    }

    /// Append a message to its conversation's log, creating the conversation
    /// on first reference. Duplicate message ids are dropped.
    pub fn append(&self, message: Message, origin: MessageOrigin) -> AppendResult {
        let mut result = AppendResult::default();
        let mut conv = self
            .conversations
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                result.new_conversation = true;
                Conversation::new(ConversationMeta {
                    id: message.conversation_id.clone(),
                    display_name: message.conversation_id.clone(),
                    unread_count: 0,
                })
            });

        if !conv.seen.insert(message.message_id.clone()) {
            return result;
        }
        if origin == MessageOrigin::Live && !message.from_self {
            conv.unread_count += 1;
        }
        conv.messages.push(message);
        result.appended = true;
        result
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    /// Snapshot of one conversation's full log, in arrival order.
    pub fn history(&self, conversation_id: &str) -> Option<Vec<Message>> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.messages.clone())
    }

    pub fn display_name(&self, conversation_id: &str) -> Option<String> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.display_name.clone())
    }

    /// Directory snapshot with last-message previews, ordered by id for a
    /// stable observer view.
    pub fn summaries(&self) -> Vec<ChatSummary> {
        let mut out: Vec<ChatSummary> = self
            .conversations
            .iter()
            .map(|entry| ChatSummary {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                unread_count: entry.unread_count,
                last_message: entry.last_message().cloned(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;

    fn msg(conv: &str, id: &str, text: &str, from_self: bool) -> Message {
        Message {
            conversation_id: conv.into(),
            message_id: id.into(),
            from_self,
            timestamp: 1,
            kind: ContentKind::Text,
            text: text.into(),
            media_inline: None,
            media_failed: false,
        }
    }

    #[test]
    fn append_preserves_arrival_order() {
        let store = ConversationStore::new();
        for i in 0..5 {
            store.append(msg("c1", &format!("m{i}"), &format!("t{i}"), false), MessageOrigin::Live);
        }
        let texts: Vec<String> = store
            .history("c1")
            .into_iter()
            .flatten()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["t0", "t1", "t2", "t3", "t4"]);
    }

    #[test]
    fn append_creates_conversation_on_first_reference() {
        let store = ConversationStore::new();
        let result = store.append(msg("c1", "m1", "hi", false), MessageOrigin::Live);
        assert!(result.appended);
        assert!(result.new_conversation);

        let result = store.append(msg("c1", "m2", "again", false), MessageOrigin::Live);
        assert!(result.appended);
        assert!(!result.new_conversation);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_message_ids_are_dropped() {
        let store = ConversationStore::new();
        assert!(store.append(msg("c1", "m1", "hi", false), MessageOrigin::Live).appended);
        assert!(!store.append(msg("c1", "m1", "hi", false), MessageOrigin::Live).appended);
        assert_eq!(store.history("c1").map(|h| h.len()), Some(1));
    }

    #[test]
    fn merge_conversation_is_idempotent() {
        let store = ConversationStore::new();
        assert!(store.merge_conversation(ConversationMeta {
            id: "c1".into(),
            display_name: "Ada".into(),
            unread_count: 2,
        }));
        // A second load must not overwrite the existing entry.
        assert!(!store.merge_conversation(ConversationMeta {
            id: "c1".into(),
            display_name: "Overwritten".into(),
            unread_count: 9,
        }));
        let summaries = store.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].display_name, "Ada");
        assert_eq!(summaries[0].unread_count, 2);
    }

    #[test]
    fn replayed_bulk_load_does_not_duplicate() {
        let store = ConversationStore::new();
        let batch = [msg("c1", "m1", "a", false), msg("c1", "m2", "b", true)];
        for m in &batch {
            store.append(m.clone(), MessageOrigin::History);
        }
        for m in &batch {
            assert!(!store.append(m.clone(), MessageOrigin::History).appended);
        }
        assert_eq!(store.history("c1").map(|h| h.len()), Some(2));
    }

    #[test]
    fn unread_counts_only_live_inbound() {
        let store = ConversationStore::new();
        store.append(msg("c1", "m1", "history", false), MessageOrigin::History);
        store.append(msg("c1", "m2", "mine", true), MessageOrigin::Live);
        store.append(msg("c1", "m3", "theirs", false), MessageOrigin::Live);
        assert_eq!(store.summaries()[0].unread_count, 1);
    }

    #[test]
    fn summaries_carry_last_message_preview() {
        let store = ConversationStore::new();
        store.append(msg("c1", "m1", "first", false), MessageOrigin::Live);
        store.append(msg("c1", "m2", "latest", false), MessageOrigin::Live);
        store.append(msg("c2", "m3", "other", false), MessageOrigin::Live);
        let summaries = store.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "c1");
        assert_eq!(
            summaries[0].last_message.as_ref().map(|m| m.text.as_str()),
            Some("latest")
        );
    }

    #[test]
    fn histories_are_independent_across_conversations() {
        let store = ConversationStore::new();
        store.append(msg("c1", "m1", "one", false), MessageOrigin::Live);
        store.append(msg("c2", "m1", "two", false), MessageOrigin::Live);
        assert_eq!(store.history("c1").map(|h| h.len()), Some(1));
        assert_eq!(store.history("c2").map(|h| h.len()), Some(1));
        assert!(store.history("c3").is_none());
    }
}
