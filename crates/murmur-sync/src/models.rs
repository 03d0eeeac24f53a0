//! Cached domain model structs.
//!
//! Everything here lives in the session-scoped in-memory cache; nothing
//! is persisted. Every struct derives `Serialize` so snapshots can be
//! handed straight to a UI layer.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use murmur_shared::protocol::MessagePayload;
use murmur_shared::{CorrelationId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// One direct-message conversation: the authoritative, ordered message
/// list plus any optimistic sends awaiting server confirmation.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Server-confirmed messages, sorted by `(created_at, message_id)`.
    /// Exactly one entry per `message_id`.
    pub messages: Vec<MessagePayload>,
    /// Locally-sent messages not yet confirmed, oldest first.
    pub pending: Vec<PendingMessage>,
    /// Whether the REST history fetch has completed at least once.
    /// Socket-delivered messages may land before it does; the history
    /// merge must keep them.
    pub history_loaded: bool,
    /// Set while the partner is typing; auto-cleared by the reconciler
    /// if no stop event arrives within the typing timeout.
    pub typing: Option<TypingState>,
}

impl Conversation {
    /// Total entries a transcript renders (confirmed + optimistic).
    pub fn len(&self) -> usize {
        self.messages.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.pending.is_empty()
    }

    pub fn contains_id(&self, id: murmur_shared::MessageId) -> bool {
        self.messages.iter().any(|m| m.message_id == id)
    }

    /// The full renderable transcript: confirmed messages in order,
    /// then optimistic sends, oldest first.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.messages
            .iter()
            .cloned()
            .map(TranscriptEntry::Confirmed)
            .chain(self.pending.iter().cloned().map(TranscriptEntry::Sending))
            .collect()
    }
}

/// One entry a transcript renders, tagged with its delivery state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum TranscriptEntry {
    /// Server-confirmed message.
    Confirmed(MessagePayload),
    /// Optimistic send awaiting server confirmation.
    Sending(PendingMessage),
}

/// An optimistic insert: rendered immediately in the `Sending` state,
/// replaced by the authoritative copy once the server confirms it,
/// removed (with the draft preserved for retry) if the send fails.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingMessage {
    pub correlation_id: CorrelationId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: Option<String>,
    pub media: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Transient "partner is typing" flag with its dead-man deadline.
#[derive(Debug, Clone, Copy)]
pub struct TypingState {
    pub expires_at: Instant,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// An ephemeral client-side notification record. Kept in a bounded
/// ring; never persisted server-side by this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub sender: UserId,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Subthread / profile projections
// ---------------------------------------------------------------------------

/// Cached projection of one subthread, patched in place by events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubthreadSummary {
    pub subthread_id: u64,
    pub name: String,
    pub description: Option<String>,
    pub subscriber_count: u64,
}

/// Cached projection of one user, patched in place by events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub karma: Option<i64>,
    pub coin_balance: Option<u64>,
    pub online: Option<bool>,
    pub premium: Option<bool>,
    pub theme: Option<serde_json::Value>,
}
