//! The shared client-side cache.
//!
//! One `CacheStore` per authenticated session holds every projection
//! the realtime layer maintains: conversations, the notification ring,
//! subthread summaries, user profiles. It is an explicit observable
//! store — mutations go through the reconcilers, which announce each
//! touched region via [`CacheStore::notify`], and any consumer can
//! [`CacheStore::subscribe`] to re-read the affected slice. No
//! mutation here ever replaces a whole collection; everything is
//! replace-if-present-else-append so concurrently-held local state
//! (an open draft, an unsent form) survives every inbound event.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use murmur_shared::constants::NOTIFICATION_RING_CAPACITY;
use murmur_shared::{ConnectionStatus, ConversationId, UserId};

use crate::models::{Conversation, Notification, SubthreadSummary, UserProfile};

/// The cache region an update touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTopic {
    Conversation(ConversationId),
    Notifications,
    Subthread(u64),
    Profile(UserId),
    Connection,
}

/// Handle returned by [`CacheStore::subscribe`]; pass it back to
/// [`CacheStore::unsubscribe`] on feature teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&StoreTopic) + Send>;

/// Session-scoped observable cache.
pub struct CacheStore {
    conversations: HashMap<ConversationId, Conversation>,
    notifications: VecDeque<Notification>,
    subthreads: HashMap<u64, SubthreadSummary>,
    profiles: HashMap<UserId, UserProfile>,
    connection: ConnectionStatus,

    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
            notifications: VecDeque::with_capacity(NOTIFICATION_RING_CAPACITY),
            subthreads: HashMap::new(),
            profiles: HashMap::new(),
            connection: ConnectionStatus::Disconnected,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    // -- observation --------------------------------------------------------

    /// Register a listener invoked with the topic of every mutation.
    pub fn subscribe(&mut self, listener: impl FnMut(&StoreTopic) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener; unknown ids are a no-op.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.retain(|(existing, _)| *existing != id);
    }

    /// Announce a mutation. Called by the reconcilers after each
    /// applied event.
    pub fn notify(&mut self, topic: StoreTopic) {
        trace!(topic = ?topic, "Cache updated");
        // Listeners may not re-enter the store; they get the topic and
        // re-read snapshots afterwards.
        let mut listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(&topic);
        }
        self.listeners = listeners;
    }

    // -- conversations ------------------------------------------------------

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = (&ConversationId, &Conversation)> {
        self.conversations.iter()
    }

    pub(crate) fn conversation_entry(&mut self, id: &ConversationId) -> &mut Conversation {
        self.conversations.entry(id.clone()).or_default()
    }

    pub(crate) fn conversation_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    pub(crate) fn conversations_mut(
        &mut self,
    ) -> impl Iterator<Item = (&ConversationId, &mut Conversation)> {
        self.conversations.iter_mut()
    }

    // -- notifications ------------------------------------------------------

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn unread_notification_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    /// Append to the ring, dropping the oldest entry once full.
    pub(crate) fn push_notification(&mut self, notification: Notification) {
        if self.notifications.len() == NOTIFICATION_RING_CAPACITY {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }

    pub(crate) fn mark_notifications_read(&mut self) {
        for n in self.notifications.iter_mut() {
            n.read = true;
        }
    }

    // -- subthreads ---------------------------------------------------------

    pub fn subthread(&self, id: u64) -> Option<&SubthreadSummary> {
        self.subthreads.get(&id)
    }

    pub(crate) fn subthread_mut(&mut self, id: u64) -> Option<&mut SubthreadSummary> {
        self.subthreads.get_mut(&id)
    }

    pub(crate) fn upsert_subthread(&mut self, summary: SubthreadSummary) {
        self.subthreads.insert(summary.subthread_id, summary);
    }

    pub(crate) fn remove_subthread(&mut self, id: u64) -> bool {
        self.subthreads.remove(&id).is_some()
    }

    // -- profiles -----------------------------------------------------------

    pub fn profile(&self, user: &UserId) -> Option<&UserProfile> {
        self.profiles.get(user)
    }

    pub(crate) fn profile_entry(&mut self, user: &UserId) -> &mut UserProfile {
        self.profiles.entry(user.clone()).or_default()
    }

    // -- connection ---------------------------------------------------------

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.connection != status {
            self.connection = status;
            self.notify(StoreTopic::Connection);
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn notification(n: usize) -> Notification {
        Notification {
            kind: "reply".into(),
            title: format!("notification {n}"),
            body: String::new(),
            link: None,
            sender: UserId::from("server"),
            created_at: Utc::now(),
            read: false,
        }
    }

    #[test]
    fn notification_ring_is_bounded() {
        let mut store = CacheStore::new();
        for n in 0..NOTIFICATION_RING_CAPACITY + 5 {
            store.push_notification(notification(n));
        }
        assert_eq!(store.notifications().count(), NOTIFICATION_RING_CAPACITY);
        // Oldest entries were dropped.
        let first = store.notifications().next().unwrap();
        assert_eq!(first.title, "notification 5");
    }

    #[test]
    fn subscribers_see_topics_until_unsubscribed() {
        let mut store = CacheStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let id = store.subscribe(move |topic| {
            seen_clone.lock().unwrap().push(topic.clone());
        });

        store.notify(StoreTopic::Notifications);
        store.unsubscribe(id);
        store.notify(StoreTopic::Connection);

        assert_eq!(&*seen.lock().unwrap(), &[StoreTopic::Notifications]);
    }

    #[test]
    fn connection_status_change_notifies_once() {
        let mut store = CacheStore::new();
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        store.subscribe(move |_| *count_clone.lock().unwrap() += 1);

        store.set_connection_status(ConnectionStatus::Connected);
        store.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
