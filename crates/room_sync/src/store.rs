//! Message Store / Reconciler: the single source of truth for a room's
//! messages, merged from snapshot, push events and local optimistic entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, SenderRef, ViewerId},
    protocol::{AttachmentRecord, MessageRecord, ReactionEntry},
};
use uuid::Uuid;

/// Canonical copy of one message. The store owns these exclusively; the
/// embedding UI only ever sees cloned projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned id; `None` only while this is a local placeholder
    /// awaiting confirmation.
    pub id: Option<MessageId>,
    /// Correlation ref for optimistic sends; kept after confirmation so late
    /// push echoes still match the same entry.
    pub client_ref: Option<Uuid>,
    pub sender: SenderRef,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub attachment: Option<AttachmentRecord>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub is_pinned: bool,
    pub reactions: Vec<ReactionEntry>,
}

impl ChatMessage {
    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            id: Some(record.message_id),
            client_ref: record.client_ref,
            sender: record.sender,
            body: record.body,
            created_at: record.created_at,
            attachment: record.attachment,
            is_edited: record.is_edited,
            is_deleted: record.is_deleted,
            is_pinned: record.is_pinned,
            reactions: dedupe_reactions(record.reactions),
        }
    }

    pub fn placeholder(
        sender: SenderRef,
        body: impl Into<String>,
        attachment: Option<AttachmentRecord>,
        client_ref: Uuid,
    ) -> Self {
        Self {
            id: None,
            client_ref: Some(client_ref),
            sender,
            body: body.into(),
            created_at: Utc::now(),
            attachment,
            is_edited: false,
            is_deleted: false,
            is_pinned: false,
            reactions: Vec::new(),
        }
    }

    pub fn is_mine(&self, viewer_id: ViewerId) -> bool {
        self.sender.viewer_id == viewer_id
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }

    fn dedupe_key(&self) -> DedupeKey {
        match (self.id, self.client_ref) {
            (Some(id), _) => DedupeKey::Server(id),
            (None, Some(client_ref)) => DedupeKey::Client(client_ref),
            // Placeholders are always constructed with a client ref.
            (None, None) => unreachable!("message without id or client ref"),
        }
    }

    fn sort_key(&self) -> (DateTime<Utc>, i64) {
        // Ties broken by id; unconfirmed placeholders sort after confirmed
        // entries at the same instant.
        (self.created_at, self.id.map(|id| id.0).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DedupeKey {
    Server(MessageId),
    Client(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A genuinely new message entered the store.
    Inserted,
    /// An entry with the same dedupe key was replaced in place.
    Replaced,
    /// An authoritative record consumed a local optimistic placeholder.
    ResolvedPlaceholder,
}

/// Ordered, deduplicated message collection for one room. All mutations
/// funnel through here; display order is re-established by a full re-sort
/// after every change, because out-of-order delivery is expected and the
/// list is bounded by room history.
#[derive(Debug)]
pub struct MessageStore {
    viewer_id: ViewerId,
    messages: Vec<ChatMessage>,
    index: HashMap<DedupeKey, usize>,
}

impl MessageStore {
    pub fn new(viewer_id: ViewerId) -> Self {
        Self {
            viewer_id,
            messages: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, message_id: MessageId) -> Option<&ChatMessage> {
        self.index
            .get(&DedupeKey::Server(message_id))
            .map(|&pos| &self.messages[pos])
    }

    /// Merge an authoritative server record (snapshot row, mutation response
    /// or push echo). Resolves a pending optimistic placeholder first, then
    /// upserts by dedupe key.
    pub fn upsert_record(&mut self, record: MessageRecord) -> UpsertOutcome {
        let resolved = self.take_matching_placeholder(&record).is_some();
        let message = ChatMessage::from_record(record);
        let key = message.dedupe_key();

        let replaced = match self.index.get(&key) {
            Some(&pos) => {
                self.messages[pos] = message;
                true
            }
            None => {
                self.messages.push(message);
                false
            }
        };
        self.resort();

        if resolved {
            UpsertOutcome::ResolvedPlaceholder
        } else if replaced {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        }
    }

    /// Insert a local optimistic placeholder created by the mutation
    /// pipeline.
    pub fn insert_placeholder(&mut self, message: ChatMessage) {
        debug_assert!(message.is_placeholder());
        let key = message.dedupe_key();
        match self.index.get(&key) {
            Some(&pos) => self.messages[pos] = message,
            None => self.messages.push(message),
        }
        self.resort();
    }

    /// Drop a placeholder after a failed send.
    pub fn remove_placeholder(&mut self, client_ref: Uuid) -> Option<ChatMessage> {
        self.remove_by_key(DedupeKey::Client(client_ref))
    }

    /// Last-write-wins edit patch keyed by id. Applying the same patch twice
    /// converges on the same state.
    pub fn apply_update(&mut self, message_id: MessageId, body: &str, is_edited: bool) -> bool {
        let Some(&pos) = self.index.get(&DedupeKey::Server(message_id)) else {
            return false;
        };
        let message = &mut self.messages[pos];
        message.body = body.to_string();
        message.is_edited = is_edited;
        true
    }

    pub fn remove(&mut self, message_id: MessageId) -> Option<ChatMessage> {
        self.remove_by_key(DedupeKey::Server(message_id))
    }

    /// Authoritative full replacement of a message's reaction list. Pins and
    /// reactions on absent messages are ignored client-side.
    pub fn replace_reactions(
        &mut self,
        message_id: MessageId,
        reactions: Vec<ReactionEntry>,
    ) -> bool {
        let Some(&pos) = self.index.get(&DedupeKey::Server(message_id)) else {
            return false;
        };
        self.messages[pos].reactions = dedupe_reactions(reactions);
        true
    }

    /// Put back a message removed optimistically, after the delete call
    /// failed.
    pub fn restore(&mut self, message: ChatMessage) {
        let key = message.dedupe_key();
        match self.index.get(&key) {
            Some(&pos) => self.messages[pos] = message,
            None => self.messages.push(message),
        }
        self.resort();
    }

    pub fn set_message_pin(&mut self, message_id: MessageId, pinned: bool) -> bool {
        let Some(&pos) = self.index.get(&DedupeKey::Server(message_id)) else {
            return false;
        };
        self.messages[pos].is_pinned = pinned;
        true
    }

    /// The message shown as the pinned banner. The data model nominally
    /// allows only one pin per room; if several are marked, the
    /// most-recently-created wins.
    pub fn pinned_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.is_pinned)
            .max_by_key(|m| m.sort_key())
    }

    fn take_matching_placeholder(&mut self, record: &MessageRecord) -> Option<ChatMessage> {
        if let Some(client_ref) = record.client_ref {
            if let Some(placeholder) = self.remove_by_key(DedupeKey::Client(client_ref)) {
                return Some(placeholder);
            }
        }

        // Fallback for echoes that lack the correlation ref: the most recent
        // own placeholder with a matching body.
        if record.sender.viewer_id != self.viewer_id {
            return None;
        }
        let client_ref = self
            .messages
            .iter()
            .filter(|m| m.is_placeholder() && m.body == record.body)
            .max_by_key(|m| m.created_at)
            .and_then(|m| m.client_ref)?;
        self.remove_by_key(DedupeKey::Client(client_ref))
    }

    fn remove_by_key(&mut self, key: DedupeKey) -> Option<ChatMessage> {
        let pos = self.index.remove(&key)?;
        let removed = self.messages.remove(pos);
        self.resort();
        Some(removed)
    }

    fn resort(&mut self) {
        self.messages.sort_by_key(ChatMessage::sort_key);
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(pos, message)| (message.dedupe_key(), pos))
            .collect();
    }
}

/// Enforce the one-entry-per-viewer invariant, keeping the last entry when
/// the server hands us a list that violates it.
fn dedupe_reactions(reactions: Vec<ReactionEntry>) -> Vec<ReactionEntry> {
    let mut deduped: Vec<ReactionEntry> = Vec::with_capacity(reactions.len());
    for entry in reactions {
        if let Some(existing) = deduped.iter_mut().find(|e| e.viewer_id == entry.viewer_id) {
            *existing = entry;
        } else {
            deduped.push(entry);
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::RoomId;

    const VIEWER: ViewerId = ViewerId(1);

    fn record(id: i64, created_at_secs: i64, body: &str) -> MessageRecord {
        MessageRecord {
            message_id: MessageId(id),
            room_id: RoomId(10),
            sender: SenderRef::new(ViewerId(2), "Alice"),
            body: body.to_string(),
            created_at: DateTime::from_timestamp(created_at_secs, 0).expect("timestamp"),
            attachment: None,
            is_edited: false,
            is_deleted: false,
            is_pinned: false,
            reactions: Vec::new(),
            client_ref: None,
        }
    }

    fn own_record(id: i64, created_at_secs: i64, body: &str) -> MessageRecord {
        MessageRecord {
            sender: SenderRef::new(VIEWER, "Me"),
            ..record(id, created_at_secs, body)
        }
    }

    #[test]
    fn repeated_delivery_keeps_exactly_one_entry() {
        let mut store = MessageStore::new(VIEWER);
        assert_eq!(store.upsert_record(record(7, 5, "hi")), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_record(record(7, 5, "hi")), UpsertOutcome::Replaced);
        assert_eq!(store.upsert_record(record(7, 5, "hi")), UpsertOutcome::Replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, Some(MessageId(7)));
    }

    #[test]
    fn display_order_follows_created_at_not_arrival_order() {
        let mut store = MessageStore::new(VIEWER);
        store.upsert_record(record(1, 1, "A"));
        store.upsert_record(record(2, 3, "B"));
        store.upsert_record(record(3, 2, "C"));

        let bodies: Vec<&str> = store.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["A", "C", "B"]);
    }

    #[test]
    fn ties_on_created_at_break_by_id() {
        let mut store = MessageStore::new(VIEWER);
        store.upsert_record(record(9, 1, "second"));
        store.upsert_record(record(4, 1, "first"));

        let ids: Vec<Option<MessageId>> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![Some(MessageId(4)), Some(MessageId(9))]);
    }

    #[test]
    fn placeholder_resolved_by_client_ref_without_duplicate() {
        let mut store = MessageStore::new(VIEWER);
        let client_ref = Uuid::new_v4();
        store.insert_placeholder(ChatMessage::placeholder(
            SenderRef::new(VIEWER, "Me"),
            "hi",
            None,
            client_ref,
        ));
        assert_eq!(store.len(), 1);

        let mut confirmed = own_record(42, 9, "hi");
        confirmed.client_ref = Some(client_ref);
        assert_eq!(
            store.upsert_record(confirmed.clone()),
            UpsertOutcome::ResolvedPlaceholder
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, Some(MessageId(42)));

        // A later push echo for the same id is a plain replace.
        assert_eq!(store.upsert_record(confirmed), UpsertOutcome::Replaced);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn placeholder_resolved_by_body_fallback_when_echo_lacks_ref() {
        let mut store = MessageStore::new(VIEWER);
        store.insert_placeholder(ChatMessage::placeholder(
            SenderRef::new(VIEWER, "Me"),
            "hi",
            None,
            Uuid::new_v4(),
        ));

        assert_eq!(
            store.upsert_record(own_record(42, 9, "hi")),
            UpsertOutcome::ResolvedPlaceholder
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, Some(MessageId(42)));
    }

    #[test]
    fn other_senders_never_consume_local_placeholders() {
        let mut store = MessageStore::new(VIEWER);
        store.insert_placeholder(ChatMessage::placeholder(
            SenderRef::new(VIEWER, "Me"),
            "hi",
            None,
            Uuid::new_v4(),
        ));

        assert_eq!(store.upsert_record(record(42, 9, "hi")), UpsertOutcome::Inserted);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn update_application_is_idempotent() {
        let mut store = MessageStore::new(VIEWER);
        store.upsert_record(record(7, 5, "before"));

        assert!(store.apply_update(MessageId(7), "after", true));
        let once = store.messages().to_vec();
        assert!(store.apply_update(MessageId(7), "after", true));
        assert_eq!(store.messages(), once.as_slice());
        assert_eq!(store.messages()[0].body, "after");
        assert!(store.messages()[0].is_edited);
    }

    #[test]
    fn update_and_remove_on_missing_id_are_noops() {
        let mut store = MessageStore::new(VIEWER);
        assert!(!store.apply_update(MessageId(1), "x", true));
        assert!(store.remove(MessageId(1)).is_none());
        assert!(!store.replace_reactions(MessageId(1), Vec::new()));
        assert!(!store.set_message_pin(MessageId(1), true));
    }

    #[test]
    fn reaction_replacement_enforces_one_entry_per_viewer() {
        let mut store = MessageStore::new(VIEWER);
        store.upsert_record(record(7, 5, "hi"));

        store.replace_reactions(
            MessageId(7),
            vec![
                ReactionEntry {
                    viewer_id: ViewerId(3),
                    value: "👍".to_string(),
                },
                ReactionEntry {
                    viewer_id: ViewerId(3),
                    value: "❤️".to_string(),
                },
            ],
        );
        let reactions = &store.get(MessageId(7)).expect("message").reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].value, "❤️");
    }

    #[test]
    fn pinned_banner_picks_most_recently_created() {
        let mut store = MessageStore::new(VIEWER);
        store.upsert_record(MessageRecord {
            is_pinned: true,
            ..record(1, 1, "old pin")
        });
        store.upsert_record(MessageRecord {
            is_pinned: true,
            ..record(2, 8, "new pin")
        });

        assert_eq!(store.pinned_message().map(|m| m.body.as_str()), Some("new pin"));

        store.set_message_pin(MessageId(2), false);
        assert_eq!(store.pinned_message().map(|m| m.body.as_str()), Some("old pin"));
    }
}
