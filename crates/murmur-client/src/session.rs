//! The per-login session task.
//!
//! One authenticated identity gets exactly one session, and one
//! session owns exactly one realtime connection; logging out (or
//! switching identity) drops the whole task, which closes the
//! connection and discards every piece of realtime state before any
//! new session is spawned. External code talks to the task through
//! typed command and update channels, the same command/notification
//! pattern the transport layer uses underneath.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use murmur_net::{spawn_connection, ConnectionEvent, Frame, NavLocation, RoomTracker, Transport};
use murmur_shared::constants::CHANNEL_CAPACITY;
use murmur_shared::protocol::{MessagePayload, ProfileUpdate};
use murmur_shared::{
    ClientEvent, ConnectionStatus, ConversationId, CorrelationId, RoomId, ServerEvent, UserId,
};
use murmur_sync::{
    CacheStore, ChatReconciler, EventDispatcher, HandlerId, NotificationReconciler, ScrollAction,
    ScrollController, StoreTopic, TranscriptEntry,
};

use crate::api::ForumApi;
use crate::config::SessionConfig;
use crate::handlers;

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// The user navigated; recompute room membership (debounced) and
    /// remember which chat, if any, is open.
    SetLocation {
        location: NavLocation,
        chat_partner: Option<UserId>,
    },
    /// Send a direct message (optimistic insert + REST call).
    SendMessage {
        receiver: UserId,
        content: Option<String>,
        media: Option<String>,
    },
    /// Local user started typing to `partner`.
    Typing { partner: UserId },
    /// Local user stopped typing to `partner`.
    StopTyping { partner: UserId },
    /// Mark the conversation with `partner` as seen, locally and
    /// through the REST collaborator.
    MarkSeen { partner: UserId },
    /// Mark the whole notification ring as read.
    MarkNotificationsRead,
    /// Load `user`'s profile into the cache for the info panel.
    FetchProfile { user: UserId },
    /// The transcript viewport moved.
    ViewportScrolled { distance_from_bottom: f64 },
    /// The unread indicator was clicked.
    IndicatorClicked,
    /// Snapshot of one conversation's transcript, confirmed and
    /// still-sending entries alike.
    GetConversation {
        partner: UserId,
        reply: oneshot::Sender<Vec<TranscriptEntry>>,
    },
    /// Snapshot of the connection status.
    GetConnectionStatus {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    /// Tear the session down.
    Logout,
}

/// Notifications sent *from* the session task to the UI layer.
#[derive(Debug)]
pub enum SessionUpdate {
    /// A cache region changed; re-read whatever renders it.
    CacheChanged(StoreTopic),
    /// The realtime connection changed state.
    ConnectionChanged(ConnectionStatus),
    /// The scroll controller decided how to present a new message.
    Scroll(ScrollAction),
    /// A send failed; the optimistic entry was reverted and `draft`
    /// holds the text to put back into the compose box.
    SendFailed {
        receiver: UserId,
        draft: Option<String>,
    },
}

/// Results of spawned REST calls, fed back into the loop. REST and
/// socket completions interleave arbitrarily; the reconcilers merge
/// in either order.
enum Internal {
    HistoryLoaded {
        partner: UserId,
        result: anyhow::Result<Vec<MessagePayload>>,
    },
    InboxLoaded(anyhow::Result<Vec<MessagePayload>>),
    SendFinished {
        receiver: UserId,
        correlation_id: CorrelationId,
        result: anyhow::Result<MessagePayload>,
    },
    ProfileLoaded(anyhow::Result<ProfileUpdate>),
}

/// State shared between the session loop and the event handlers.
pub(crate) struct Shared {
    pub store: CacheStore,
    pub scroll: ScrollController,
    pub open_chat: Option<UserId>,
}

/// Spawn the session task for `me`.
///
/// Returns `(command_tx, update_rx)`. Dropping the command sender is
/// equivalent to [`SessionCommand::Logout`].
pub fn spawn_session<T, A>(
    me: UserId,
    config: SessionConfig,
    api: A,
    transport: T,
) -> (mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionUpdate>)
where
    T: Transport + 'static,
    A: ForumApi,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (update_tx, update_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (internal_tx, internal_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let (frame_tx, conn_events) = spawn_connection(transport);
        let task = SessionTask::new(me, config, api, frame_tx, internal_tx, update_tx);
        task.run(cmd_rx, conn_events, internal_rx).await;
    });

    (cmd_tx, update_rx)
}

struct SessionTask<A: ForumApi> {
    me: UserId,
    config: SessionConfig,
    api: Arc<A>,
    shared: Arc<Mutex<Shared>>,
    dispatcher: EventDispatcher,
    handler_ids: Vec<HandlerId>,
    tracker: RoomTracker,
    chat: ChatReconciler,
    notifications: NotificationReconciler,
    frame_tx: mpsc::Sender<Frame>,
    internal_tx: mpsc::Sender<Internal>,
    update_tx: mpsc::Sender<SessionUpdate>,
    inbox_requested: bool,
}

impl<A: ForumApi> SessionTask<A> {
    fn new(
        me: UserId,
        config: SessionConfig,
        api: A,
        frame_tx: mpsc::Sender<Frame>,
        internal_tx: mpsc::Sender<Internal>,
        update_tx: mpsc::Sender<SessionUpdate>,
    ) -> Self {
        let mut store = CacheStore::new();
        {
            // Forward every cache mutation topic to the UI layer.
            let updates = update_tx.clone();
            store.subscribe(move |topic| {
                if updates
                    .try_send(SessionUpdate::CacheChanged(topic.clone()))
                    .is_err()
                {
                    debug!(topic = ?topic, "Update channel full, dropping cache notification");
                }
            });
        }
        let shared = Arc::new(Mutex::new(Shared {
            store,
            scroll: ScrollController::new(),
            open_chat: None,
        }));

        let mut dispatcher = EventDispatcher::new();
        let handler_ids = handlers::register_defaults(
            &mut dispatcher,
            Arc::clone(&shared),
            me.clone(),
            update_tx.clone(),
        );

        Self {
            tracker: RoomTracker::new(me.clone()),
            chat: ChatReconciler::new(me.clone()),
            notifications: NotificationReconciler::new(),
            me,
            config,
            api: Arc::new(api),
            shared,
            dispatcher,
            handler_ids,
            frame_tx,
            internal_tx,
            update_tx,
            inbox_requested: false,
        }
    }

    /// Lock the shared state, recovering from a poisoned lock (a
    /// panicking handler must not take the whole session down).
    fn state(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut conn_events: mpsc::Receiver<ConnectionEvent>,
        mut internal_rx: mpsc::Receiver<Internal>,
    ) {
        info!(user = %self.me, "Session starting");

        loop {
            let deadline = self.next_deadline();
            let timer = async {
                match deadline {
                    Some(at) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    None => {
                        info!("Command channel closed, tearing session down");
                        break;
                    }
                    Some(SessionCommand::Logout) => {
                        info!("Logout requested");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                maybe_event = conn_events.recv() => match maybe_event {
                    None => {
                        warn!("Connection task ended");
                        break;
                    }
                    Some(event) => self.handle_connection_event(event).await,
                },
                maybe_internal = internal_rx.recv() => {
                    if let Some(internal) = maybe_internal {
                        self.handle_internal(internal);
                    }
                },
                _ = timer => self.tick().await,
            }
        }

        self.teardown();
    }

    /// The earliest of the room-debounce and typing deadlines.
    fn next_deadline(&self) -> Option<Instant> {
        let typing = {
            let state = self.state();
            self.chat.next_typing_deadline(&state.store)
        };
        match (self.tracker.next_deadline(), typing) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// A deadline fired: apply due room diffs and expire typing flags.
    async fn tick(&mut self) {
        let now = Instant::now();
        let room_events = self.tracker.poll(now);
        {
            let mut state = self.state();
            self.chat.poll_typing(&mut state.store, now);
        }
        for event in room_events {
            self.send_event(&event).await;
        }
    }

    async fn send_event(&self, event: &ClientEvent) {
        if self.frame_tx.send(Frame::from(event)).await.is_err() {
            debug!("Connection task gone, dropping outbound event");
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Ready { rejoin } => {
                self.state()
                    .store
                    .set_connection_status(ConnectionStatus::Connected);
                let _ = self
                    .update_tx
                    .try_send(SessionUpdate::ConnectionChanged(ConnectionStatus::Connected));

                let lifecycle = if rejoin {
                    ServerEvent::Reconnected
                } else {
                    ServerEvent::Connected
                };
                self.dispatcher.dispatch(&lifecycle);

                // Replay the membership set (on first connect this is
                // just the personal notification room).
                for event in self.tracker.rejoin_all() {
                    self.send_event(&event).await;
                }

                if self.config.fetch_inbox_on_connect && !self.inbox_requested {
                    self.inbox_requested = true;
                    let api = Arc::clone(&self.api);
                    let internal = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let result = api.fetch_inbox().await;
                        let _ = internal.send(Internal::InboxLoaded(result)).await;
                    });
                }
            }
            ConnectionEvent::Down { status } => {
                self.state().store.set_connection_status(status);
                let _ = self
                    .update_tx
                    .try_send(SessionUpdate::ConnectionChanged(status));
                self.dispatcher.dispatch(&ServerEvent::Disconnected);
            }
            ConnectionEvent::Frame(frame) => {
                match ServerEvent::decode(&frame.event, frame.data) {
                    Ok(Some(event)) => {
                        self.dispatcher.dispatch(&event);
                    }
                    Ok(None) => debug!(event = %frame.event, "Unknown event name, ignoring"),
                    Err(e) => {
                        warn!(event = %frame.event, error = %e, "Dropping malformed event payload")
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetLocation {
                location,
                chat_partner,
            } => {
                self.tracker
                    .set_context(location, chat_partner.as_ref(), Instant::now());

                let needs_history = {
                    let mut state = self.state();
                    if state.open_chat != chat_partner {
                        // Fresh transcript, fresh scroll state.
                        state.scroll = ScrollController::new();
                    }
                    state.open_chat = chat_partner.clone();
                    chat_partner.as_ref().is_some_and(|partner| {
                        let conv = ConversationId::new(self.me.clone(), partner.clone());
                        !state
                            .store
                            .conversation(&conv)
                            .is_some_and(|c| c.history_loaded)
                    })
                };

                if needs_history {
                    if let Some(partner) = chat_partner {
                        let api = Arc::clone(&self.api);
                        let internal = self.internal_tx.clone();
                        let me = self.me.clone();
                        tokio::spawn(async move {
                            let result = api.fetch_history(me, partner.clone()).await;
                            let _ = internal
                                .send(Internal::HistoryLoaded { partner, result })
                                .await;
                        });
                    }
                }
            }
            SessionCommand::SendMessage {
                receiver,
                content,
                media,
            } => {
                let correlation_id = self.chat.begin_send(
                    &mut self.state().store,
                    receiver.clone(),
                    content.clone(),
                    media.clone(),
                    Utc::now(),
                );
                let api = Arc::clone(&self.api);
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = api
                        .send_message(receiver.clone(), content, media, correlation_id)
                        .await;
                    let _ = internal
                        .send(Internal::SendFinished {
                            receiver,
                            correlation_id,
                            result,
                        })
                        .await;
                });
            }
            SessionCommand::Typing { partner } => {
                self.send_event(&ClientEvent::Typing {
                    room: RoomId::chat(self.me.clone(), partner),
                    user: self.me.clone(),
                })
                .await;
            }
            SessionCommand::StopTyping { partner } => {
                self.send_event(&ClientEvent::StopTyping {
                    room: RoomId::chat(self.me.clone(), partner),
                    user: self.me.clone(),
                })
                .await;
            }
            SessionCommand::MarkSeen { partner } => {
                let conv = ConversationId::new(self.me.clone(), partner.clone());
                self.chat.mark_seen(&mut self.state().store, &conv);
                let api = Arc::clone(&self.api);
                tokio::spawn(async move {
                    if let Err(e) = api.mark_seen(partner).await {
                        warn!(error = %e, "mark-as-seen call failed");
                    }
                });
            }
            SessionCommand::MarkNotificationsRead => {
                self.notifications.mark_all_read(&mut self.state().store);
            }
            SessionCommand::FetchProfile { user } => {
                let api = Arc::clone(&self.api);
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = api.fetch_profile(user).await;
                    let _ = internal.send(Internal::ProfileLoaded(result)).await;
                });
            }
            SessionCommand::ViewportScrolled {
                distance_from_bottom,
            } => {
                let action = self.state().scroll.on_scroll(distance_from_bottom);
                if action != ScrollAction::None {
                    let _ = self.update_tx.try_send(SessionUpdate::Scroll(action));
                }
            }
            SessionCommand::IndicatorClicked => {
                let action = self.state().scroll.on_indicator_clicked();
                let _ = self.update_tx.try_send(SessionUpdate::Scroll(action));
            }
            SessionCommand::GetConversation { partner, reply } => {
                let conv = ConversationId::new(self.me.clone(), partner);
                let snapshot = self
                    .state()
                    .store
                    .conversation(&conv)
                    .map(|c| c.transcript())
                    .unwrap_or_default();
                let _ = reply.send(snapshot);
            }
            SessionCommand::GetConnectionStatus { reply } => {
                let _ = reply.send(self.state().store.connection_status());
            }
            SessionCommand::Logout => unreachable!("handled by the run loop"),
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::HistoryLoaded { partner, result } => match result {
                Ok(history) => {
                    let conv = ConversationId::new(self.me.clone(), partner);
                    self.chat
                        .merge_history(&mut self.state().store, &conv, history);
                }
                // Live messages still flow; only the backlog is missing.
                Err(e) => warn!(partner = %partner, error = %e, "History fetch failed"),
            },
            Internal::InboxLoaded(result) => match result {
                Ok(summaries) => {
                    self.chat.merge_summary(&mut self.state().store, summaries);
                }
                Err(e) => warn!(error = %e, "Inbox fetch failed"),
            },
            Internal::SendFinished {
                receiver,
                correlation_id,
                result,
            } => match result {
                Ok(message) => {
                    self.chat
                        .confirm_send(&mut self.state().store, correlation_id, message);
                }
                Err(e) => {
                    warn!(receiver = %receiver, error = %e, "Send failed, reverting optimistic entry");
                    let reverted =
                        self.chat
                            .fail_send(&mut self.state().store, &receiver, correlation_id);
                    let _ = self.update_tx.try_send(SessionUpdate::SendFailed {
                        receiver,
                        draft: reverted.and_then(|p| p.content),
                    });
                }
            },
            Internal::ProfileLoaded(result) => match result {
                Ok(update) => {
                    self.notifications
                        .apply(&mut self.state().store, &ServerEvent::ProfileUpdated(update));
                }
                Err(e) => warn!(error = %e, "Profile fetch failed"),
            },
        }
    }

    fn teardown(mut self) {
        for id in std::mem::take(&mut self.handler_ids) {
            self.dispatcher.unregister(id);
        }
        // Dropping `frame_tx` shuts the connection task down, closing
        // the socket before any successor session opens its own.
        info!(user = %self.me, "Session terminated, realtime state discarded");
    }
}
