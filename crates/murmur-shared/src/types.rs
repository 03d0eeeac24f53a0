use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user identity: the account's unique username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Server-assigned message identifier, authoritative for deduplication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated id attached to an outgoing message so the server
/// echo can be matched back to the optimistic entry it confirms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unordered pair of participants in a direct-message conversation.
///
/// Construction sorts the two usernames so that `(alice, bob)` and
/// `(bob, alice)` key the same conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId {
    first: UserId,
    second: UserId,
}

impl ConversationId {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// The conversation partner from `me`'s point of view.
    pub fn partner_of(&self, me: &UserId) -> &UserId {
        if &self.first == me {
            &self.second
        } else {
            &self.first
        }
    }

    /// Both participants, in canonical order.
    pub fn pair(&self) -> (&UserId, &UserId) {
        (&self.first, &self.second)
    }

    pub fn room(&self) -> RoomId {
        RoomId::Chat(self.clone())
    }
}

/// A logical pub/sub channel on the realtime transport.
///
/// Membership is ephemeral and derived from navigation state; only the
/// personal room is pinned for the whole session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Personal notification room, joined once at session start.
    User(UserId),
    /// Activity in one subthread.
    Thread(u64),
    /// Comment activity on one post.
    Post(u64),
    /// A direct-message pair, canonicalized by username order.
    Chat(ConversationId),
}

impl RoomId {
    pub fn chat(a: UserId, b: UserId) -> Self {
        Self::Chat(ConversationId::new(a, b))
    }

    /// The room name as it appears in `join`/`leave` frames.
    pub fn wire_name(&self) -> String {
        match self {
            Self::User(user) => format!("user_{user}"),
            Self::Thread(id) => format!("thread_{id}"),
            Self::Post(id) => format!("post_{id}"),
            Self::Chat(conv) => format!("chat_{}_{}", conv.first, conv.second),
        }
    }

    /// Parse a wire room name back into a `RoomId`.
    ///
    /// Chat rooms assume usernames without underscores, which the forum
    /// enforces at registration.
    pub fn from_wire(name: &str) -> crate::Result<Self> {
        if let Some(rest) = name.strip_prefix("user_") {
            return Ok(Self::User(UserId::new(rest)));
        }
        if let Some(rest) = name.strip_prefix("thread_") {
            let id = rest
                .parse()
                .map_err(|_| crate::ProtocolError::BadRoom(name.to_string()))?;
            return Ok(Self::Thread(id));
        }
        if let Some(rest) = name.strip_prefix("post_") {
            let id = rest
                .parse()
                .map_err(|_| crate::ProtocolError::BadRoom(name.to_string()))?;
            return Ok(Self::Post(id));
        }
        if let Some(rest) = name.strip_prefix("chat_") {
            if let Some((a, b)) = rest.split_once('_') {
                if !a.is_empty() && !b.is_empty() {
                    return Ok(Self::chat(UserId::new(a), UserId::new(b)));
                }
            }
        }
        Err(crate::ProtocolError::BadRoom(name.to_string()))
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Lifecycle of the realtime connection, as observed by consumers.
///
/// Every consumer treats the connection as optional: `Disconnected`
/// means live updates are off, nothing else is degraded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}
