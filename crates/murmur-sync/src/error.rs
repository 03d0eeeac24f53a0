use thiserror::Error;

/// Errors produced by the reconciliation layer.
///
/// Most reconciler paths are deliberately infallible no-ops (unknown
/// ids, unloaded conversations); what remains is malformed input.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An event referenced a room name the client cannot parse.
    #[error(transparent)]
    Protocol(#[from] murmur_shared::ProtocolError),

    /// An event referenced a room kind that makes no sense in context
    /// (e.g. a typing event for a post room).
    #[error("Event not applicable to room '{0}'")]
    WrongRoomKind(String),
}
