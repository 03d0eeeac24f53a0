use std::time::Duration;

/// Debounce applied to location-driven room membership changes, so fast
/// navigation does not emit a join/leave pair for a room the user is
/// merely passing through.
pub const ROOM_DEBOUNCE: Duration = Duration::from_millis(300);

/// Dead-man's-switch for the typing indicator: cleared this long after
/// the last `user_typing` event if no `user_stop_typing` arrives.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// First reconnect delay; doubled on each failed attempt.
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Reconnect attempts before the connection settles into `Disconnected`
/// and live updates degrade to off.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Notifications retained per session (ring buffer, oldest dropped).
pub const NOTIFICATION_RING_CAPACITY: usize = 50;

/// How close to the transcript bottom (in pixels) still counts as
/// "at the bottom" for auto-scroll purposes.
pub const SCROLL_BOTTOM_THRESHOLD_PX: f64 = 10.0;

/// Capacity of the session command / update channels.
pub const CHANNEL_CAPACITY: usize = 256;
