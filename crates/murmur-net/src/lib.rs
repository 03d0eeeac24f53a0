// Realtime transport layer: WebSocket framing, the reconnecting
// connection task, and location-driven room membership.

pub mod connection;
pub mod rooms;
pub mod transport;

mod error;

pub use connection::{spawn_connection, ConnectionEvent, ConnectionState};
pub use error::NetError;
pub use rooms::{NavLocation, RoomTracker};
pub use transport::{Frame, Transport, TransportLink, WsTransport};
