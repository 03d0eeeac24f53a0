//! Chat state reconciliation.
//!
//! Merges socket-delivered message events, REST-fetched history, and
//! locally-sent (optimistic) messages into one ordered, deduplicated
//! list per conversation. Invariants:
//!
//! - exactly one authoritative entry per `message_id`, sorted by
//!   `(created_at, message_id)` ascending;
//! - an optimistic insert is replaced by its confirmation, never
//!   duplicated: matched by correlation id when the server echoes it,
//!   by sender + content as a fallback;
//! - edits and deletes referencing ids not present locally are silent
//!   no-ops (the conversation may simply not be loaded);
//! - socket events from the local user that confirm nothing are
//!   dropped (the optimistic path already rendered them); history and
//!   inbox merges keep own messages, since sends from past sessions
//!   have nothing pending to confirm them.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use murmur_shared::constants::TYPING_TIMEOUT;
use murmur_shared::protocol::{MessageDelete, MessageEdit, MessagePayload};
use murmur_shared::{ConversationId, CorrelationId, UserId};

use crate::models::{Conversation, PendingMessage, TypingState};
use crate::store::{CacheStore, StoreTopic};

/// What [`ChatReconciler::apply_inbound`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Appended as a new authoritative message.
    Inserted,
    /// Replaced an optimistic entry it confirmed.
    ConfirmedPending,
    /// Duplicate `message_id`, dropped.
    Duplicate,
    /// Self-echo with nothing left to confirm, dropped.
    SelfEcho,
}

pub struct ChatReconciler {
    me: UserId,
}

impl ChatReconciler {
    pub fn new(me: UserId) -> Self {
        Self { me }
    }

    fn conversation_of(&self, a: &UserId, b: &UserId) -> ConversationId {
        ConversationId::new(a.clone(), b.clone())
    }

    /// Apply an inbound `new_message` event.
    pub fn apply_inbound(&self, store: &mut CacheStore, message: MessagePayload) -> Applied {
        let conv_id = self.conversation_of(&message.sender, &message.receiver);
        let conv = store.conversation_entry(&conv_id);

        // An inbound message from the partner means they stopped typing.
        if message.sender != self.me {
            conv.typing = None;
        }

        let applied = Self::reconcile(conv, message, &self.me);
        match applied {
            Applied::Duplicate | Applied::SelfEcho => {
                trace!(conversation = ?conv_id, result = ?applied, "Inbound message dropped");
            }
            _ => store.notify(StoreTopic::Conversation(conv_id)),
        }
        applied
    }

    /// Reconcile one live socket message. Distinct from
    /// [`ChatReconciler::merge_entry`] in exactly one way: an own
    /// message that confirms nothing is dropped, because the
    /// optimistic path already rendered it.
    fn reconcile(conv: &mut Conversation, message: MessagePayload, me: &UserId) -> Applied {
        let message = match Self::confirm_pending(conv, message, me) {
            Ok(applied) => return applied,
            Err(message) => message,
        };
        if conv.contains_id(message.message_id) {
            return Applied::Duplicate;
        }
        if message.sender == *me {
            return Applied::SelfEcho;
        }
        Self::insert_sorted(conv, message);
        Applied::Inserted
    }

    /// Merge one REST-fetched entry (history or inbox summary). Own
    /// messages with nothing pending are kept: sends from a previous
    /// session have no optimistic entry covering them.
    fn merge_entry(conv: &mut Conversation, message: MessagePayload, me: &UserId) -> Applied {
        let message = match Self::confirm_pending(conv, message, me) {
            Ok(applied) => return applied,
            Err(message) => message,
        };
        if conv.contains_id(message.message_id) {
            return Applied::Duplicate;
        }
        Self::insert_sorted(conv, message);
        Applied::Inserted
    }

    /// Try to settle a pending optimistic entry with `message`: by
    /// correlation id when the server echoes one, else (for own
    /// messages) by content. Hands the message back when nothing
    /// matched.
    fn confirm_pending(
        conv: &mut Conversation,
        message: MessagePayload,
        me: &UserId,
    ) -> Result<Applied, MessagePayload> {
        if let Some(corr) = message.correlation_id {
            if let Some(pos) = conv.pending.iter().position(|p| p.correlation_id == corr) {
                conv.pending.remove(pos);
                Self::insert_sorted(conv, message);
                return Ok(Applied::ConfirmedPending);
            }
        }
        if message.sender == *me {
            // Fallback for servers that echo no correlation id:
            // confirm the oldest pending entry with the same content.
            if let Some(pos) = conv
                .pending
                .iter()
                .position(|p| p.content == message.content && p.media == message.media)
            {
                conv.pending.remove(pos);
                Self::insert_sorted(conv, message);
                return Ok(Applied::ConfirmedPending);
            }
        }
        Err(message)
    }

    /// Insert keeping the `(created_at, message_id)` order. The caller
    /// has already ruled out a duplicate id.
    fn insert_sorted(conv: &mut Conversation, message: MessagePayload) {
        let key = (message.created_at, message.message_id);
        let pos = conv
            .messages
            .partition_point(|m| (m.created_at, m.message_id) <= key);
        conv.messages.insert(pos, message);
    }

    // -- sending ------------------------------------------------------------

    /// Optimistically insert a message the local user just submitted.
    ///
    /// Returns the correlation id to thread through the REST send call.
    pub fn begin_send(
        &self,
        store: &mut CacheStore,
        receiver: UserId,
        content: Option<String>,
        media: Option<String>,
        created_at: DateTime<Utc>,
    ) -> CorrelationId {
        let correlation_id = CorrelationId::new();
        let conv_id = self.conversation_of(&self.me, &receiver);
        let conv = store.conversation_entry(&conv_id);
        conv.pending.push(PendingMessage {
            correlation_id,
            sender: self.me.clone(),
            receiver,
            content,
            media,
            created_at,
        });
        debug!(conversation = ?conv_id, correlation = %correlation_id, "Optimistic send");
        store.notify(StoreTopic::Conversation(conv_id));
        correlation_id
    }

    /// The REST send call returned the authoritative message.
    pub fn confirm_send(
        &self,
        store: &mut CacheStore,
        correlation_id: CorrelationId,
        mut message: MessagePayload,
    ) {
        message.correlation_id = Some(correlation_id);
        let conv_id = self.conversation_of(&message.sender, &message.receiver);
        let conv = store.conversation_entry(&conv_id);
        conv.pending.retain(|p| p.correlation_id != correlation_id);
        if !conv.contains_id(message.message_id) {
            Self::insert_sorted(conv, message);
        }
        store.notify(StoreTopic::Conversation(conv_id));
    }

    /// The REST send call failed: revert the optimistic entry and hand
    /// back its content so the compose box can preserve the draft.
    pub fn fail_send(
        &self,
        store: &mut CacheStore,
        receiver: &UserId,
        correlation_id: CorrelationId,
    ) -> Option<PendingMessage> {
        let conv_id = self.conversation_of(&self.me, receiver);
        let conv = store.conversation_mut(&conv_id)?;
        let pos = conv
            .pending
            .iter()
            .position(|p| p.correlation_id == correlation_id)?;
        let reverted = conv.pending.remove(pos);
        debug!(conversation = ?conv_id, correlation = %correlation_id, "Send failed, optimistic entry reverted");
        store.notify(StoreTopic::Conversation(conv_id));
        Some(reverted)
    }

    // -- edits / deletes ----------------------------------------------------

    /// Apply an edit in place; no-op if the id is not loaded locally.
    pub fn apply_edit(&self, store: &mut CacheStore, edit: MessageEdit) {
        let conv_id = self.conversation_of(&edit.sender, &edit.receiver);
        let Some(conv) = store.conversation_mut(&conv_id) else {
            return;
        };
        let Some(message) = conv
            .messages
            .iter_mut()
            .find(|m| m.message_id == edit.message_id)
        else {
            trace!(id = %edit.message_id, "Edit for unknown message, ignoring");
            return;
        };
        message.content = edit.content;
        message.edited_at = Some(edit.edited_at);
        store.notify(StoreTopic::Conversation(conv_id));
    }

    /// Remove the message entirely; no-op if the id is not loaded.
    pub fn apply_delete(&self, store: &mut CacheStore, delete: MessageDelete) {
        let conv_id = self.conversation_of(&delete.sender, &delete.receiver);
        let Some(conv) = store.conversation_mut(&conv_id) else {
            return;
        };
        let before = conv.messages.len();
        conv.messages.retain(|m| m.message_id != delete.message_id);
        if conv.messages.len() != before {
            store.notify(StoreTopic::Conversation(conv_id));
        }
    }

    // -- history ------------------------------------------------------------

    /// Merge a REST-fetched history page into the conversation.
    ///
    /// Socket events may have landed first; merge, never overwrite.
    /// History entries carrying a correlation id also settle any
    /// still-pending optimistic sends they correspond to.
    pub fn merge_history(
        &self,
        store: &mut CacheStore,
        conv_id: &ConversationId,
        history: Vec<MessagePayload>,
    ) {
        let conv = store.conversation_entry(conv_id);
        for message in history {
            Self::merge_entry(conv, message, &self.me);
        }
        conv.history_loaded = true;
        store.notify(StoreTopic::Conversation(conv_id.clone()));
    }

    /// Merge an inbox summary (latest message per conversation) into
    /// the cache. Unlike [`ChatReconciler::merge_history`] this does
    /// not mark any conversation's history as loaded.
    pub fn merge_summary(&self, store: &mut CacheStore, messages: Vec<MessagePayload>) {
        let mut touched = Vec::new();
        for message in messages {
            let conv_id = self.conversation_of(&message.sender, &message.receiver);
            let conv = store.conversation_entry(&conv_id);
            let applied = Self::merge_entry(conv, message, &self.me);
            if matches!(applied, Applied::Inserted | Applied::ConfirmedPending)
                && !touched.contains(&conv_id)
            {
                touched.push(conv_id);
            }
        }
        for conv_id in touched {
            store.notify(StoreTopic::Conversation(conv_id));
        }
    }

    /// Mark every partner message in the conversation as seen.
    pub fn mark_seen(&self, store: &mut CacheStore, conv_id: &ConversationId) {
        let Some(conv) = store.conversation_mut(conv_id) else {
            return;
        };
        let mut changed = false;
        for message in conv.messages.iter_mut() {
            if message.sender != self.me && !message.seen {
                message.seen = true;
                changed = true;
            }
        }
        if changed {
            store.notify(StoreTopic::Conversation(conv_id.clone()));
        }
    }

    // -- typing -------------------------------------------------------------

    /// Partner started typing; arms the 3s dead-man's switch.
    pub fn set_typing(&self, store: &mut CacheStore, conv_id: &ConversationId, now: Instant) {
        let conv = store.conversation_entry(conv_id);
        conv.typing = Some(TypingState {
            expires_at: now + TYPING_TIMEOUT,
        });
        store.notify(StoreTopic::Conversation(conv_id.clone()));
    }

    /// Partner stopped typing.
    pub fn clear_typing(&self, store: &mut CacheStore, conv_id: &ConversationId) {
        let cleared = store
            .conversation_mut(conv_id)
            .is_some_and(|conv| conv.typing.take().is_some());
        if cleared {
            store.notify(StoreTopic::Conversation(conv_id.clone()));
        }
    }

    /// Clear typing flags whose deadline passed (the stop event never
    /// arrived). Returns the conversations that changed.
    pub fn poll_typing(&self, store: &mut CacheStore, now: Instant) -> Vec<ConversationId> {
        let mut expired = Vec::new();
        for (id, conv) in store.conversations_mut() {
            if conv
                .typing
                .is_some_and(|t| t.expires_at <= now)
            {
                conv.typing = None;
                expired.push(id.clone());
            }
        }
        for id in &expired {
            store.notify(StoreTopic::Conversation(id.clone()));
        }
        expired
    }

    /// Earliest typing deadline, for the session loop's timer.
    pub fn next_typing_deadline(&self, store: &CacheStore) -> Option<Instant> {
        store
            .conversations()
            .filter_map(|(_, conv)| conv.typing.map(|t| t.expires_at))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_shared::MessageId;

    fn payload(id: i64, sender: &str, receiver: &str, content: &str) -> MessagePayload {
        MessagePayload {
            message_id: MessageId(id),
            sender: UserId::from(sender),
            receiver: UserId::from(receiver),
            content: Some(content.to_string()),
            media: None,
            created_at: DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap(),
            edited_at: None,
            seen: false,
            correlation_id: None,
        }
    }

    fn setup() -> (ChatReconciler, CacheStore, ConversationId) {
        let reconciler = ChatReconciler::new(UserId::from("alice"));
        let store = CacheStore::new();
        let conv = ConversationId::new(UserId::from("alice"), UserId::from("bob"));
        (reconciler, store, conv)
    }

    #[test]
    fn repeated_message_ids_appear_once() {
        let (reconciler, mut store, conv) = setup();
        for _ in 0..3 {
            reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi"));
        }
        assert_eq!(
            reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi")),
            Applied::Duplicate
        );
        assert_eq!(store.conversation(&conv).unwrap().messages.len(), 1);
    }

    #[test]
    fn messages_stay_sorted_despite_arrival_order() {
        let (reconciler, mut store, conv) = setup();
        for id in [5, 2, 9, 1, 2, 7] {
            reconciler.apply_inbound(&mut store, payload(id, "bob", "alice", "m"));
        }
        let messages = &store.conversation(&conv).unwrap().messages;
        let keys: Vec<_> = messages
            .iter()
            .map(|m| (m.created_at, m.message_id))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn timestamp_tie_broken_by_id() {
        let (reconciler, mut store, conv) = setup();
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for id in [3, 1, 2] {
            let mut msg = payload(id, "bob", "alice", "m");
            msg.created_at = ts;
            reconciler.apply_inbound(&mut store, msg);
        }
        let ids: Vec<_> = store
            .conversation(&conv)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.message_id.0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn optimistic_send_then_socket_confirm() {
        let (reconciler, mut store, conv) = setup();
        let correlation =
            reconciler.begin_send(&mut store, UserId::from("bob"), Some("hello".into()), None, Utc::now());
        {
            let c = store.conversation(&conv).unwrap();
            assert_eq!(c.pending.len(), 1);
            assert_eq!(c.messages.len(), 0);
        }

        let mut echo = payload(42, "alice", "bob", "hello");
        echo.correlation_id = Some(correlation);
        assert_eq!(
            reconciler.apply_inbound(&mut store, echo),
            Applied::ConfirmedPending
        );

        let c = store.conversation(&conv).unwrap();
        assert_eq!(c.len(), 1);
        assert!(c.pending.is_empty());
        assert_eq!(c.messages[0].message_id, MessageId(42));
    }

    #[test]
    fn self_echo_without_pending_is_suppressed() {
        let (reconciler, mut store, conv) = setup();
        let correlation =
            reconciler.begin_send(&mut store, UserId::from("bob"), Some("hello".into()), None, Utc::now());
        reconciler.confirm_send(&mut store, correlation, payload(42, "alice", "bob", "hello"));
        assert_eq!(store.conversation(&conv).unwrap().len(), 1);

        // The socket echo arrives after the REST confirm: exactly one
        // entry must remain.
        let mut echo = payload(42, "alice", "bob", "hello");
        echo.correlation_id = Some(correlation);
        reconciler.apply_inbound(&mut store, echo);
        assert_eq!(store.conversation(&conv).unwrap().len(), 1);

        // And a pure self-echo with a fresh id confirms nothing.
        assert_eq!(
            reconciler.apply_inbound(&mut store, payload(43, "alice", "bob", "other")),
            Applied::SelfEcho
        );
        assert_eq!(store.conversation(&conv).unwrap().len(), 1);
    }

    #[test]
    fn fallback_confirm_without_correlation_id() {
        let (reconciler, mut store, conv) = setup();
        reconciler.begin_send(&mut store, UserId::from("bob"), Some("hello".into()), None, Utc::now());

        // Server echoes over the socket without the correlation field.
        assert_eq!(
            reconciler.apply_inbound(&mut store, payload(7, "alice", "bob", "hello")),
            Applied::ConfirmedPending
        );
        let c = store.conversation(&conv).unwrap();
        assert_eq!(c.len(), 1);
        assert!(c.pending.is_empty());
    }

    #[test]
    fn failed_send_reverts_and_preserves_draft() {
        let (reconciler, mut store, conv) = setup();
        let correlation =
            reconciler.begin_send(&mut store, UserId::from("bob"), Some("hello".into()), None, Utc::now());

        let reverted = reconciler
            .fail_send(&mut store, &UserId::from("bob"), correlation)
            .unwrap();
        assert_eq!(reverted.content.as_deref(), Some("hello"));
        assert_eq!(store.conversation(&conv).unwrap().len(), 0);
    }

    #[test]
    fn edit_unknown_id_is_a_noop() {
        let (reconciler, mut store, conv) = setup();
        reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi"));

        reconciler.apply_edit(
            &mut store,
            MessageEdit {
                message_id: MessageId(999),
                sender: UserId::from("bob"),
                receiver: UserId::from("alice"),
                content: Some("edited".into()),
                edited_at: Utc::now(),
            },
        );
        let c = store.conversation(&conv).unwrap();
        assert_eq!(c.messages.len(), 1);
        assert_eq!(c.messages[0].content.as_deref(), Some("hi"));
        assert!(c.messages[0].edited_at.is_none());
    }

    #[test]
    fn edit_and_delete_apply_in_place() {
        let (reconciler, mut store, conv) = setup();
        reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi"));
        reconciler.apply_inbound(&mut store, payload(2, "bob", "alice", "bye"));

        let edited_at = Utc::now();
        reconciler.apply_edit(
            &mut store,
            MessageEdit {
                message_id: MessageId(1),
                sender: UserId::from("bob"),
                receiver: UserId::from("alice"),
                content: Some("hello!".into()),
                edited_at,
            },
        );
        reconciler.apply_delete(
            &mut store,
            MessageDelete {
                message_id: MessageId(2),
                sender: UserId::from("bob"),
                receiver: UserId::from("alice"),
            },
        );

        let c = store.conversation(&conv).unwrap();
        assert_eq!(c.messages.len(), 1);
        assert_eq!(c.messages[0].content.as_deref(), Some("hello!"));
        assert_eq!(c.messages[0].edited_at, Some(edited_at));
    }

    #[test]
    fn late_history_merges_with_socket_messages() {
        let (reconciler, mut store, conv) = setup();
        // Socket message arrives before the REST history completes.
        reconciler.apply_inbound(&mut store, payload(10, "bob", "alice", "live"));

        reconciler.merge_history(
            &mut store,
            &conv,
            vec![
                payload(1, "bob", "alice", "old"),
                payload(10, "bob", "alice", "live"),
                payload(2, "alice", "bob", "mine"),
            ],
        );

        let c = store.conversation(&conv).unwrap();
        assert!(c.history_loaded);
        let ids: Vec<_> = c.messages.iter().map(|m| m.message_id.0).collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[test]
    fn history_restores_own_messages_from_past_sessions() {
        let (reconciler, mut store, conv) = setup();
        // Nothing pending: these sends happened in an earlier session.
        reconciler.merge_history(
            &mut store,
            &conv,
            vec![
                payload(1, "bob", "alice", "hey"),
                payload(2, "alice", "bob", "hey yourself"),
            ],
        );

        let ids: Vec<_> = store
            .conversation(&conv)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.message_id.0)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn inbox_summary_keeps_own_latest_message() {
        let (reconciler, mut store, conv) = setup();
        reconciler.merge_summary(&mut store, vec![payload(5, "alice", "bob", "sent earlier")]);
        assert_eq!(store.conversation(&conv).unwrap().messages.len(), 1);
    }

    #[test]
    fn typing_auto_clears_after_timeout() {
        let (reconciler, mut store, conv) = setup();
        let t0 = Instant::now();
        reconciler.set_typing(&mut store, &conv, t0);
        assert!(store.conversation(&conv).unwrap().typing.is_some());

        // Just before the deadline: still typing.
        assert!(reconciler
            .poll_typing(&mut store, t0 + TYPING_TIMEOUT - std::time::Duration::from_millis(1))
            .is_empty());

        let expired = reconciler.poll_typing(&mut store, t0 + TYPING_TIMEOUT);
        assert_eq!(expired, vec![conv.clone()]);
        assert!(store.conversation(&conv).unwrap().typing.is_none());
    }

    #[test]
    fn stop_typing_clears_before_timeout() {
        let (reconciler, mut store, conv) = setup();
        let t0 = Instant::now();
        reconciler.set_typing(&mut store, &conv, t0);
        reconciler.clear_typing(&mut store, &conv);
        assert!(store.conversation(&conv).unwrap().typing.is_none());
        assert!(reconciler.next_typing_deadline(&store).is_none());
    }

    #[test]
    fn inbound_partner_message_clears_typing() {
        let (reconciler, mut store, conv) = setup();
        reconciler.set_typing(&mut store, &conv, Instant::now());
        reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi"));
        assert!(store.conversation(&conv).unwrap().typing.is_none());
    }

    #[test]
    fn mark_seen_only_touches_partner_messages() {
        let (reconciler, mut store, conv) = setup();
        reconciler.apply_inbound(&mut store, payload(1, "bob", "alice", "hi"));
        let correlation =
            reconciler.begin_send(&mut store, UserId::from("bob"), Some("yo".into()), None, Utc::now());
        reconciler.confirm_send(&mut store, correlation, payload(2, "alice", "bob", "yo"));

        reconciler.mark_seen(&mut store, &conv);
        let c = store.conversation(&conv).unwrap();
        let partner = c.messages.iter().find(|m| m.message_id == MessageId(1)).unwrap();
        assert!(partner.seen);
        let own = c.messages.iter().find(|m| m.message_id == MessageId(2)).unwrap();
        assert!(!own.seen);
    }
}
