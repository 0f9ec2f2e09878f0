//! Transport seam between the hub channel and the network
//!
//! `Connector` opens a fresh text-frame transport; the channel owns at most
//! one `Transport` at a time. Any error a transport returns is treated as a
//! connection reset.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Duplex stream of text frames
#[async_trait]
pub trait Transport: Send {
    /// Write one frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next text frame. Must be cancel-safe.
    async fn recv_text(&mut self) -> Result<String>;

    /// Close the transport, ignoring errors
    async fn close(&mut self);
}

/// Opens transports to the hub
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Endpoint description for logs
    fn endpoint(&self) -> String;
}

/// WebSocket connector (`ws://` or `wss://`)
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ConnectionDropped(format!("connecting to {}: {}", self.url, e)))?;

        debug!("WebSocket connected to {}", self.url);
        Ok(Box::new(WsTransport { stream }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::ConnectionDropped(e.to_string()))
    }

    async fn recv_text(&mut self) -> Result<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(text),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by hub ({}: {})", f.code, f.reason))
                        .unwrap_or_else(|| "closed by hub".to_string());
                    return Err(Error::ConnectionDropped(reason));
                }
                Some(Ok(_)) => {
                    // Ping/Pong; tungstenite answers pings itself
                    trace!("WebSocket control frame");
                }
                Some(Err(e)) => return Err(Error::ConnectionDropped(e.to_string())),
                None => return Err(Error::ConnectionDropped("stream ended".to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("WebSocket close: {}", e);
        }
    }
}
