//! # murmur-shared
//!
//! Domain types and the socket event protocol shared by every Murmur
//! crate: room/user/message identifiers, the closed enumeration of
//! server and client events with tolerant JSON decoding, and the
//! protocol constants (debounce interval, typing timeout, backoff
//! bounds) the rest of the core is tuned by.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::{ProtocolError, Result};
pub use protocol::{ClientEvent, EventKind, ServerEvent};
pub use types::{ConnectionStatus, ConversationId, CorrelationId, MessageId, RoomId, UserId};
