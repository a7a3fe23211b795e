//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Protocol-level ping/pong is answered by tungstenite itself; this module
//! only surfaces text.  Binary frames are accepted if they hold valid UTF-8,
//! since some proxies re-frame text as binary.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::transport::{Connection, Connector};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` (or `wss://`) connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) =
            connect_async(address)
                .await
                .map_err(|e| TransportError::Connect {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
        debug!("websocket handshake with {address} completed ({})", response.status());
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// An established WebSocket.
pub struct WebSocketConnection {
    stream: WsStream,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|_| TransportError::InvalidUtf8))
                }
                Ok(Message::Close(frame)) => {
                    debug!("websocket close frame received: {frame:?}");
                    return None;
                }
                // Ping, Pong and raw frames carry nothing for us.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Closing an already-closed socket is not worth reporting.
        let _ = self.stream.close(None).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_unreachable_address_is_connect_error() {
        // Port 9 (discard) on localhost is essentially never listening.
        let result = WebSocketConnector.connect("ws://127.0.0.1:9/ws").await;

        match result {
            Err(TransportError::Connect { address, .. }) => {
                assert_eq!(address, "ws://127.0.0.1:9/ws")
            }
            Err(other) => panic!("expected connect error, got {other}"),
            Ok(_) => panic!("connection unexpectedly succeeded"),
        }
    }

    #[tokio::test]
    async fn test_connect_with_invalid_url_is_connect_error() {
        let result = WebSocketConnector.connect("not a url").await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
