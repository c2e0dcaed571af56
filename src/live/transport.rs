//! Text-frame transports for the live channel.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{AgendaError, Result};

/// Opens connections to a live endpoint.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn LiveConnection>>;
}

/// One open, bidirectional text connection.
#[async_trait]
pub trait LiveConnection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;
    /// Next text frame; `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketConnection {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn LiveConnection>> {
        let (socket, response) = connect_async(url).await.map_err(AgendaError::transport)?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());
        let (sink, stream) = socket.split();
        Ok(Box::new(WebSocketConnection { sink, stream }))
    }
}

#[async_trait]
impl LiveConnection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(AgendaError::transport)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                // Control frames are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(AgendaError::transport(e))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
