//! Default event routing: the single place mapping every inbound
//! [`ServerEvent`] kind to the reconciler that owns it. Features with
//! extra needs register additional handlers on the same dispatcher;
//! the defaults here never assume they are alone.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::trace;

use murmur_shared::{ConversationId, EventKind, RoomId, ServerEvent, UserId};
use murmur_sync::{
    Applied, ChatReconciler, EventDispatcher, HandlerId, NotificationReconciler, SyncError,
};

use crate::session::{SessionUpdate, Shared};

/// Event kinds owned by the notification/counter reconciler.
const COUNTER_KINDS: [EventKind; 16] = [
    EventKind::Notification,
    EventKind::ProfileUpdated,
    EventKind::UserStatusChanged,
    EventKind::ThemeChanged,
    EventKind::KarmaUpdated,
    EventKind::CoinBalanceUpdated,
    EventKind::CoinPurchaseComplete,
    EventKind::AvatarPurchased,
    EventKind::SubthreadJoined,
    EventKind::SubthreadLeft,
    EventKind::SubthreadCreated,
    EventKind::SubthreadUpdated,
    EventKind::SubthreadDeleted,
    EventKind::UserSubscriptionChanged,
    EventKind::PaymentCompleted,
    EventKind::SubscriptionPurchased,
];

fn lock(shared: &Arc<Mutex<Shared>>) -> anyhow::Result<std::sync::MutexGuard<'_, Shared>> {
    shared.lock().map_err(|_| anyhow!("session state lock poisoned"))
}

/// Resolve a typing event's room to the conversation it addresses.
fn typing_conversation(room: &str) -> Result<ConversationId, SyncError> {
    match RoomId::from_wire(room)? {
        RoomId::Chat(conv) => Ok(conv),
        _ => Err(SyncError::WrongRoomKind(room.to_string())),
    }
}

/// Register the default handlers for one session. Returns the ids so
/// the session can unregister them all on teardown.
pub(crate) fn register_defaults(
    dispatcher: &mut EventDispatcher,
    shared: Arc<Mutex<Shared>>,
    me: UserId,
    updates: mpsc::Sender<SessionUpdate>,
) -> Vec<HandlerId> {
    let mut ids = Vec::new();

    // Chat: new messages, with scroll/seen side effects for whichever
    // conversation is currently open.
    {
        let shared = Arc::clone(&shared);
        let me = me.clone();
        let chat = ChatReconciler::new(me.clone());
        ids.push(dispatcher.register(EventKind::NewMessage, move |event| {
            let ServerEvent::NewMessage(payload) = event else {
                return Ok(());
            };
            let mut state = lock(&shared)?;
            let conv_id =
                ConversationId::new(payload.sender.clone(), payload.receiver.clone());
            let applied = chat.apply_inbound(&mut state.store, payload.clone());
            trace!(conversation = ?conv_id, result = ?applied, "new_message reconciled");

            if applied == Applied::Inserted {
                let open = state
                    .open_chat
                    .as_ref()
                    .map(|partner| ConversationId::new(me.clone(), partner.clone()));
                if open.as_ref() == Some(&conv_id) {
                    // Visible conversation: mark seen locally and let
                    // the scroll controller decide how to reveal it.
                    chat.mark_seen(&mut state.store, &conv_id);
                    let action = state.scroll.on_new_message();
                    let _ = updates.try_send(SessionUpdate::Scroll(action));
                }
            }
            Ok(())
        }));
    }

    // Chat: edits and deletes.
    {
        let shared = Arc::clone(&shared);
        let chat = ChatReconciler::new(me.clone());
        ids.push(dispatcher.register(EventKind::MessageEdited, move |event| {
            let ServerEvent::MessageEdited(edit) = event else {
                return Ok(());
            };
            chat.apply_edit(&mut lock(&shared)?.store, edit.clone());
            Ok(())
        }));
    }
    {
        let shared = Arc::clone(&shared);
        let chat = ChatReconciler::new(me.clone());
        ids.push(dispatcher.register(EventKind::MessageDeleted, move |event| {
            let ServerEvent::MessageDeleted(delete) = event else {
                return Ok(());
            };
            chat.apply_delete(&mut lock(&shared)?.store, delete.clone());
            Ok(())
        }));
    }

    // Typing indicator, with its dead-man timeout armed on set.
    {
        let shared = Arc::clone(&shared);
        let chat = ChatReconciler::new(me.clone());
        let me = me.clone();
        ids.push(dispatcher.register(EventKind::UserTyping, move |event| {
            let ServerEvent::UserTyping(payload) = event else {
                return Ok(());
            };
            // Some servers broadcast typing to the whole room,
            // sender included; never show the user their own flag.
            if payload.user == me {
                return Ok(());
            }
            let conv = typing_conversation(&payload.room)?;
            chat.set_typing(&mut lock(&shared)?.store, &conv, Instant::now());
            Ok(())
        }));
    }
    {
        let shared = Arc::clone(&shared);
        let chat = ChatReconciler::new(me.clone());
        ids.push(dispatcher.register(EventKind::UserStopTyping, move |event| {
            let ServerEvent::UserStopTyping(payload) = event else {
                return Ok(());
            };
            let conv = typing_conversation(&payload.room)?;
            chat.clear_typing(&mut lock(&shared)?.store, &conv);
            Ok(())
        }));
    }

    // Notifications and every aggregate-counter patch.
    for kind in COUNTER_KINDS {
        let shared = Arc::clone(&shared);
        let reconciler = NotificationReconciler::new();
        ids.push(dispatcher.register(kind, move |event| {
            reconciler.apply(&mut lock(&shared)?.store, event);
            Ok(())
        }));
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_shared::protocol::{MessagePayload, TypingPayload};
    use murmur_shared::MessageId;
    use murmur_sync::{CacheStore, ScrollController};

    fn new_session_state() -> Arc<Mutex<Shared>> {
        Arc::new(Mutex::new(Shared {
            store: CacheStore::new(),
            scroll: ScrollController::new(),
            open_chat: None,
        }))
    }

    fn wired_dispatcher(
        shared: &Arc<Mutex<Shared>>,
    ) -> (EventDispatcher, mpsc::Receiver<SessionUpdate>) {
        let (tx, rx) = mpsc::channel(16);
        let mut dispatcher = EventDispatcher::new();
        register_defaults(&mut dispatcher, Arc::clone(shared), UserId::from("alice"), tx);
        (dispatcher, rx)
    }

    fn message(id: i64, sender: &str, receiver: &str) -> ServerEvent {
        ServerEvent::NewMessage(MessagePayload {
            message_id: MessageId(id),
            sender: UserId::from(sender),
            receiver: UserId::from(receiver),
            content: Some("hi".into()),
            media: None,
            created_at: Utc::now(),
            edited_at: None,
            seen: false,
            correlation_id: None,
        })
    }

    #[test]
    fn new_message_lands_in_the_store() {
        let shared = new_session_state();
        let (mut dispatcher, _rx) = wired_dispatcher(&shared);

        dispatcher.dispatch(&message(1, "bob", "alice"));

        let state = shared.lock().unwrap();
        let conv = ConversationId::new(UserId::from("alice"), UserId::from("bob"));
        assert_eq!(state.store.conversation(&conv).unwrap().messages.len(), 1);
    }

    #[test]
    fn open_conversation_triggers_scroll_decision() {
        let shared = new_session_state();
        shared.lock().unwrap().open_chat = Some(UserId::from("bob"));
        let (mut dispatcher, mut rx) = wired_dispatcher(&shared);

        dispatcher.dispatch(&message(1, "bob", "alice"));

        match rx.try_recv() {
            Ok(SessionUpdate::Scroll(action)) => {
                assert_eq!(action, murmur_sync::ScrollAction::AutoScroll)
            }
            other => panic!("expected scroll update, got {other:?}"),
        }
        // And the message is already marked seen locally.
        let state = shared.lock().unwrap();
        let conv = ConversationId::new(UserId::from("alice"), UserId::from("bob"));
        assert!(state.store.conversation(&conv).unwrap().messages[0].seen);
    }

    #[test]
    fn typing_event_for_non_chat_room_is_isolated() {
        let shared = new_session_state();
        let (mut dispatcher, _rx) = wired_dispatcher(&shared);

        // The handler errors (and is logged), nothing panics, and the
        // store stays untouched.
        let invoked = dispatcher.dispatch(&ServerEvent::UserTyping(TypingPayload {
            room: "thread_1".into(),
            user: UserId::from("bob"),
        }));
        assert_eq!(invoked, 1);
        assert_eq!(shared.lock().unwrap().store.conversations().count(), 0);
    }

    #[test]
    fn own_typing_echo_is_ignored() {
        let shared = new_session_state();
        let (mut dispatcher, _rx) = wired_dispatcher(&shared);

        dispatcher.dispatch(&ServerEvent::UserTyping(TypingPayload {
            room: "chat_alice_bob".into(),
            user: UserId::from("alice"),
        }));
        assert_eq!(shared.lock().unwrap().store.conversations().count(), 0);

        // The partner's flag still lands.
        dispatcher.dispatch(&ServerEvent::UserTyping(TypingPayload {
            room: "chat_alice_bob".into(),
            user: UserId::from("bob"),
        }));
        let state = shared.lock().unwrap();
        let conv = ConversationId::new(UserId::from("alice"), UserId::from("bob"));
        assert!(state.store.conversation(&conv).unwrap().typing.is_some());
    }

    #[test]
    fn counter_events_reach_the_notification_reconciler() {
        let shared = new_session_state();
        let (mut dispatcher, _rx) = wired_dispatcher(&shared);

        dispatcher.dispatch(&ServerEvent::KarmaUpdated(
            murmur_shared::protocol::KarmaUpdate {
                user: UserId::from("alice"),
                karma: 99,
            },
        ));

        let state = shared.lock().unwrap();
        assert_eq!(
            state.store.profile(&UserId::from("alice")).unwrap().karma,
            Some(99)
        );
    }
}
