use thiserror::Error;

/// Errors produced while decoding or encoding socket protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame was not the expected `{"event": ..., "data": ...}` object.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A known event name carried a payload that failed to decode.
    #[error("Bad payload for event '{event}': {source}")]
    BadPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    /// A room name did not match any known `RoomId` shape.
    #[error("Unrecognized room name: {0}")]
    BadRoom(String),

    /// JSON (de)serialization error outside of event payload decoding.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
