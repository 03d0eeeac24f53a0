//! The wire transport seam.
//!
//! A [`Transport`] produces, per successful connect, a [`TransportLink`]:
//! a pair of mpsc channels carrying [`Frame`]s. The link is considered
//! dead when the inbound channel yields `None`. Keeping the seam
//! channel-shaped means the connection task and every test drive it the
//! same way; only [`WsTransport`] touches an actual socket.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use murmur_shared::{ClientEvent, ProtocolError};

use crate::error::NetError;

/// One named JSON event on the wire: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::json!({ "event": self.event, "data": self.data }).to_string()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedFrame(truncate(text)))?
            .to_string();
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        Ok(Self { event, data })
    }
}

impl From<&ClientEvent> for Frame {
    fn from(event: &ClientEvent) -> Self {
        let (name, data) = event.encode();
        Self::new(name, data)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

/// A live bidirectional link to the server.
///
/// Dropping `outbound` closes the link; `inbound` yielding `None`
/// means the peer (or the socket) went away.
pub struct TransportLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// Anything that can open a [`TransportLink`]. Implemented by
/// [`WsTransport`] in production and by in-memory fakes in tests.
pub trait Transport: Send {
    fn connect(&mut self) -> impl Future<Output = Result<TransportLink, NetError>> + Send;
}

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<TransportLink, NetError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(64);

        // Outbound pump: frames from the session onto the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(WsMessage::Text(frame.encode())).await {
                    warn!(error = %e, "WebSocket send failed, closing outbound pump");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Inbound pump: socket messages decoded into frames. Dropping
        // `in_tx` on exit is what signals link death upstream.
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(other) => {
                        debug!(kind = ?other, "Ignoring non-text WebSocket message");
                        continue;
                    }
                };
                match Frame::decode(&text) {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
