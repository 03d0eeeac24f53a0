use thiserror::Error;

/// Errors produced by the transport layer.
///
/// None of these reach feature code: the connection task absorbs them
/// into reconnect attempts and a status flag.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid endpoint URL: {0}")]
    BadUrl(#[from] url::ParseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] murmur_shared::ProtocolError),

    #[error("Connection closed")]
    Closed,
}
