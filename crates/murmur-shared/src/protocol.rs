//! The socket event protocol.
//!
//! Every event the server can push is a named JSON payload. Instead of
//! matching event-name strings all over the client, the names decode
//! into one closed [`ServerEvent`] enumeration here, and everything
//! downstream matches on that. Unknown event names decode to `None`
//! (forward compatibility); a known name with a malformed payload is a
//! [`ProtocolError`] the dispatcher logs and drops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{CorrelationId, MessageId, RoomId, UserId};

/// A direct message as carried by `new_message` events and send echoes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    /// Text body; `None` for media-only messages.
    #[serde(default)]
    pub content: Option<String>,
    /// Reference to an uploaded media object, if any.
    #[serde(default)]
    pub media: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen: bool,
    /// Echo of the client-generated id from the send call, when the
    /// server supports it.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEdit {
    pub message_id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    #[serde(default)]
    pub content: Option<String>,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDelete {
    pub message_id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
}

/// `user_typing` / `user_stop_typing` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingPayload {
    pub room: String,
    pub user: UserId,
}

/// A pushed notification for the session's ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    /// Free-form type tag (`"reply"`, `"mention"`, ...); kept as a
    /// string so new server-side kinds pass through untouched.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Deep link to the entity the notification is about.
    #[serde(default)]
    pub link: Option<String>,
    pub sender: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    pub user: UserId,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub user: UserId,
    pub online: bool,
}

/// Custom theme applied to a user's profile or subthread skin.
/// The theme body is opaque to the sync core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThemeChange {
    pub user: UserId,
    pub theme: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KarmaUpdate {
    pub user: UserId,
    pub karma: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoinBalance {
    pub user: UserId,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoinPurchase {
    pub user: UserId,
    pub amount: u64,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvatarPurchase {
    pub user: UserId,
    pub avatar_id: u64,
    #[serde(default)]
    pub balance: Option<u64>,
}

/// One user joining or leaving one subthread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubthreadMembership {
    pub subthread_id: u64,
    pub user: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubthreadInfo {
    pub subthread_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubthreadDeleted {
    pub subthread_id: u64,
}

/// Premium-subscription state change for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionChange {
    pub user: UserId,
    pub active: bool,
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentCompleted {
    pub user: UserId,
    pub amount: u64,
    #[serde(default)]
    pub balance: Option<u64>,
}

/// Every inbound event the core reacts to.
///
/// The first four are transport lifecycle signals synthesized by the
/// connection manager; the rest arrive as named frames on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected,
    Disconnected,
    Reconnected,
    ConnectError(String),

    NewMessage(MessagePayload),
    MessageEdited(MessageEdit),
    MessageDeleted(MessageDelete),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
    Notification(NotificationPayload),
    ProfileUpdated(ProfileUpdate),
    UserStatusChanged(StatusChange),
    ThemeChanged(ThemeChange),
    KarmaUpdated(KarmaUpdate),
    CoinBalanceUpdated(CoinBalance),
    CoinPurchaseComplete(CoinPurchase),
    AvatarPurchased(AvatarPurchase),
    SubthreadJoined(SubthreadMembership),
    SubthreadLeft(SubthreadMembership),
    SubthreadCreated(SubthreadInfo),
    SubthreadUpdated(SubthreadInfo),
    SubthreadDeleted(SubthreadDeleted),
    UserSubscriptionChanged(SubscriptionChange),
    PaymentCompleted(PaymentCompleted),
    SubscriptionPurchased(SubscriptionChange),
}

/// Payload-free discriminant of [`ServerEvent`], used to key handler
/// registrations in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnected,
    ConnectError,
    NewMessage,
    MessageEdited,
    MessageDeleted,
    UserTyping,
    UserStopTyping,
    Notification,
    ProfileUpdated,
    UserStatusChanged,
    ThemeChanged,
    KarmaUpdated,
    CoinBalanceUpdated,
    CoinPurchaseComplete,
    AvatarPurchased,
    SubthreadJoined,
    SubthreadLeft,
    SubthreadCreated,
    SubthreadUpdated,
    SubthreadDeleted,
    UserSubscriptionChanged,
    PaymentCompleted,
    SubscriptionPurchased,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Reconnected => EventKind::Reconnected,
            Self::ConnectError(_) => EventKind::ConnectError,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageEdited(_) => EventKind::MessageEdited,
            Self::MessageDeleted(_) => EventKind::MessageDeleted,
            Self::UserTyping(_) => EventKind::UserTyping,
            Self::UserStopTyping(_) => EventKind::UserStopTyping,
            Self::Notification(_) => EventKind::Notification,
            Self::ProfileUpdated(_) => EventKind::ProfileUpdated,
            Self::UserStatusChanged(_) => EventKind::UserStatusChanged,
            Self::ThemeChanged(_) => EventKind::ThemeChanged,
            Self::KarmaUpdated(_) => EventKind::KarmaUpdated,
            Self::CoinBalanceUpdated(_) => EventKind::CoinBalanceUpdated,
            Self::CoinPurchaseComplete(_) => EventKind::CoinPurchaseComplete,
            Self::AvatarPurchased(_) => EventKind::AvatarPurchased,
            Self::SubthreadJoined(_) => EventKind::SubthreadJoined,
            Self::SubthreadLeft(_) => EventKind::SubthreadLeft,
            Self::SubthreadCreated(_) => EventKind::SubthreadCreated,
            Self::SubthreadUpdated(_) => EventKind::SubthreadUpdated,
            Self::SubthreadDeleted(_) => EventKind::SubthreadDeleted,
            Self::UserSubscriptionChanged(_) => EventKind::UserSubscriptionChanged,
            Self::PaymentCompleted(_) => EventKind::PaymentCompleted,
            Self::SubscriptionPurchased(_) => EventKind::SubscriptionPurchased,
        }
    }

    /// Decode a named wire frame into a `ServerEvent`.
    ///
    /// Returns `Ok(None)` for event names this client does not know,
    /// so a newer server never breaks an older client.
    pub fn decode(name: &str, data: Value) -> Result<Option<Self>, ProtocolError> {
        fn payload<T: serde::de::DeserializeOwned>(
            name: &str,
            data: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(data).map_err(|source| ProtocolError::BadPayload {
                event: name.to_string(),
                source,
            })
        }

        let event = match name {
            "connect" => Self::Connected,
            "disconnect" => Self::Disconnected,
            "reconnect" => Self::Reconnected,
            "connect_error" => {
                let reason = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                Self::ConnectError(reason)
            }
            "new_message" => Self::NewMessage(payload(name, data)?),
            "message_edited" => Self::MessageEdited(payload(name, data)?),
            "message_deleted" => Self::MessageDeleted(payload(name, data)?),
            "user_typing" => Self::UserTyping(payload(name, data)?),
            "user_stop_typing" => Self::UserStopTyping(payload(name, data)?),
            "notification" => Self::Notification(payload(name, data)?),
            "profile_updated" => Self::ProfileUpdated(payload(name, data)?),
            "user_status_changed" => Self::UserStatusChanged(payload(name, data)?),
            "theme_changed" => Self::ThemeChanged(payload(name, data)?),
            "karma_updated" => Self::KarmaUpdated(payload(name, data)?),
            "coin_balance_updated" => Self::CoinBalanceUpdated(payload(name, data)?),
            "coin_purchase_complete" => Self::CoinPurchaseComplete(payload(name, data)?),
            "avatar_purchased" => Self::AvatarPurchased(payload(name, data)?),
            "subthread_joined" => Self::SubthreadJoined(payload(name, data)?),
            "subthread_left" => Self::SubthreadLeft(payload(name, data)?),
            "subthread_created" => Self::SubthreadCreated(payload(name, data)?),
            "subthread_updated" => Self::SubthreadUpdated(payload(name, data)?),
            "subthread_deleted" => Self::SubthreadDeleted(payload(name, data)?),
            "user_subscription_changed" => Self::UserSubscriptionChanged(payload(name, data)?),
            "payment_completed" => Self::PaymentCompleted(payload(name, data)?),
            "subscription_purchased" => Self::SubscriptionPurchased(payload(name, data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Control events the client emits on the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join { room: RoomId },
    Leave { room: RoomId },
    Typing { room: RoomId, user: UserId },
    StopTyping { room: RoomId, user: UserId },
}

impl ClientEvent {
    /// Encode to a `(event_name, payload)` wire frame.
    pub fn encode(&self) -> (&'static str, Value) {
        match self {
            Self::Join { room } => ("join", serde_json::json!({ "room": room.wire_name() })),
            Self::Leave { room } => ("leave", serde_json::json!({ "room": room.wire_name() })),
            Self::Typing { room, user } => (
                "typing",
                serde_json::json!({ "room": room.wire_name(), "user": user }),
            ),
            Self::StopTyping { room, user } => (
                "stop_typing",
                serde_json::json!({ "room": room.wire_name(), "user": user }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_new_message() {
        let data = json!({
            "message_id": 42,
            "sender": "alice",
            "receiver": "bob",
            "content": "hello",
            "created_at": "2024-05-01T12:00:00Z",
        });
        let event = ServerEvent::decode("new_message", data).unwrap().unwrap();
        match event {
            ServerEvent::NewMessage(msg) => {
                assert_eq!(msg.message_id, MessageId(42));
                assert_eq!(msg.content.as_deref(), Some("hello"));
                assert_eq!(msg.media, None);
                assert!(!msg.seen);
                assert!(msg.correlation_id.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_ignored() {
        let decoded = ServerEvent::decode("server_maintenance", json!({"at": 1})).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let result = ServerEvent::decode("karma_updated", json!({"user": "alice"}));
        assert!(matches!(
            result,
            Err(ProtocolError::BadPayload { ref event, .. }) if event == "karma_updated"
        ));
    }

    #[test]
    fn lifecycle_names_decode_without_payloads() {
        assert_eq!(
            ServerEvent::decode("connect", Value::Null).unwrap(),
            Some(ServerEvent::Connected)
        );
        assert_eq!(
            ServerEvent::decode("connect_error", json!({"message": "refused"})).unwrap(),
            Some(ServerEvent::ConnectError("refused".into()))
        );
    }

    #[test]
    fn client_event_frames() {
        let room = RoomId::chat(UserId::from("bob"), UserId::from("alice"));
        let (name, payload) = ClientEvent::Join { room: room.clone() }.encode();
        assert_eq!(name, "join");
        assert_eq!(payload, json!({ "room": "chat_alice_bob" }));

        let (name, payload) = ClientEvent::Typing {
            room,
            user: UserId::from("alice"),
        }
        .encode();
        assert_eq!(name, "typing");
        assert_eq!(payload["user"], json!("alice"));
    }
}
