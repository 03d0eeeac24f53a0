//! Location-driven room membership.
//!
//! The tracker derives which rooms the client should be in from the
//! current navigation target and open chat partner, debounces rapid
//! changes, and emits the minimal join/leave diff against its own
//! membership set. That set is the local ground truth: joining a room
//! already joined or leaving one not joined emits nothing.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use murmur_shared::constants::ROOM_DEBOUNCE;
use murmur_shared::{ClientEvent, RoomId, UserId};

/// Where the user currently is in the app, as far as rooms care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavLocation {
    /// A page with no room of its own (front page, settings, ...).
    Elsewhere,
    /// Browsing one subthread.
    Thread(u64),
    /// Reading one post's comments.
    Post(u64),
}

/// Tracks joined rooms and produces debounced join/leave diffs.
pub struct RoomTracker {
    me: UserId,
    /// Rooms we consider ourselves a member of. Includes the personal
    /// room from construction onward; it is never part of any diff.
    joined: HashSet<RoomId>,
    /// Desired set awaiting the debounce deadline.
    pending: Option<(HashSet<RoomId>, Instant)>,
}

impl RoomTracker {
    /// Create a tracker for `me`. The personal notification room is a
    /// member immediately; the caller emits its join via
    /// [`RoomTracker::rejoin_all`] once the connection is ready.
    pub fn new(me: UserId) -> Self {
        let mut joined = HashSet::new();
        joined.insert(RoomId::User(me.clone()));
        Self {
            me,
            joined,
            pending: None,
        }
    }

    fn personal_room(&self) -> RoomId {
        RoomId::User(self.me.clone())
    }

    /// Desired location-derived rooms, personal room always included.
    fn desired_rooms(&self, location: NavLocation, chat_partner: Option<&UserId>) -> HashSet<RoomId> {
        let mut rooms = HashSet::new();
        rooms.insert(self.personal_room());
        match location {
            NavLocation::Elsewhere => {}
            NavLocation::Thread(id) => {
                rooms.insert(RoomId::Thread(id));
            }
            NavLocation::Post(id) => {
                rooms.insert(RoomId::Post(id));
            }
        }
        if let Some(partner) = chat_partner {
            rooms.insert(RoomId::chat(self.me.clone(), partner.clone()));
        }
        rooms
    }

    /// Record a navigation / chat-partner change.
    ///
    /// The resulting desired set is not applied until `ROOM_DEBOUNCE`
    /// has passed without a further change, so a room the user merely
    /// passes through never sees a join/leave pair.
    pub fn set_context(
        &mut self,
        location: NavLocation,
        chat_partner: Option<&UserId>,
        now: Instant,
    ) {
        let desired = self.desired_rooms(location, chat_partner);
        if desired == self.joined {
            // Already where we want to be; cancel any pending move.
            self.pending = None;
            return;
        }
        self.pending = Some((desired, now + ROOM_DEBOUNCE));
    }

    /// When the session loop should next call [`RoomTracker::poll`].
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Apply a pending desired set whose debounce deadline has passed,
    /// returning the join/leave emissions. Calling again with the same
    /// context produces nothing.
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEvent> {
        let Some((_, deadline)) = self.pending.as_ref() else {
            return Vec::new();
        };
        if *deadline > now {
            return Vec::new();
        }
        let (desired, _) = self.pending.take().expect("pending checked above");

        let mut events = Vec::new();
        let personal = self.personal_room();

        let leaving: Vec<RoomId> = self
            .joined
            .iter()
            .filter(|room| !desired.contains(room) && **room != personal)
            .cloned()
            .collect();
        for room in leaving {
            self.joined.remove(&room);
            debug!(room = %room, "Leaving room");
            events.push(ClientEvent::Leave { room });
        }

        let mut joining: Vec<RoomId> = desired
            .into_iter()
            .filter(|room| !self.joined.contains(room))
            .collect();
        joining.sort_by_key(|room| room.wire_name());
        for room in joining {
            self.joined.insert(room.clone());
            debug!(room = %room, "Joining room");
            events.push(ClientEvent::Join { room });
        }

        events
    }

    /// Replay a join for every member room, exactly once each. Called
    /// when the connection comes (back) up.
    pub fn rejoin_all(&self) -> Vec<ClientEvent> {
        let mut rooms: Vec<RoomId> = self.joined.iter().cloned().collect();
        rooms.sort_by_key(|room| room.wire_name());
        debug!(count = rooms.len(), "Replaying room joins");
        rooms
            .into_iter()
            .map(|room| ClientEvent::Join { room })
            .collect()
    }

    /// Current membership snapshot.
    pub fn joined_rooms(&self) -> &HashSet<RoomId> {
        &self.joined
    }
}
