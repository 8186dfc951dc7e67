//! Push-channel transport seam. The engine talks to `PushConnector` /
//! `PushSink` / `PushStream`; the production implementation rides a
//! websocket with the auth token embedded as a query credential.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::domain::RoomId;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};

/// Outbound half of an open push channel.
#[async_trait]
pub trait PushSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half. `None` means the channel closed; `Some(Err)` a transport
/// error. Both drive the same reconnect transition.
#[async_trait]
pub trait PushStream: Send {
    async fn next_text(&mut self) -> Option<Result<String>>;
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(
        &self,
        room_id: RoomId,
        token: &str,
    ) -> Result<(Box<dyn PushSink>, Box<dyn PushStream>)>;
}

/// Derive the push endpoint for a room from the REST base address.
pub fn push_url(server_url: &str, room_id: RoomId, token: &str) -> Result<String> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    let ws_base = ws_base.trim_end_matches('/');
    Ok(format!("{ws_base}/rooms/{}/events?token={token}", room_id.0))
}

pub struct WebSocketPushConnector {
    server_url: String,
}

impl WebSocketPushConnector {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl PushConnector for WebSocketPushConnector {
    async fn connect(
        &self,
        room_id: RoomId,
        token: &str,
    ) -> Result<(Box<dyn PushSink>, Box<dyn PushStream>)> {
        let url = push_url(&self.server_url, room_id, token)?;
        let (ws_stream, _) = connect_async(&url)
            .await
            .with_context(|| format!("failed to connect push channel for room {}", room_id.0))?;
        let (writer, reader) = ws_stream.split();
        Ok((
            Box::new(WebSocketSink { writer }),
            Box::new(WebSocketStreamHalf { reader }),
        ))
    }
}

type WsWriter = futures::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsReader = futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

struct WebSocketSink {
    writer: WsWriter,
}

#[async_trait]
impl PushSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.writer.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.send(Message::Close(None)).await?;
        Ok(())
    }
}

struct WebSocketStreamHalf {
    reader: WsReader,
}

#[async_trait]
impl PushStream for WebSocketStreamHalf {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.reader.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings/pongs/binary frames carry no chat payload.
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_ws_scheme_and_query_credential() {
        let url = push_url("https://chat.example.com", RoomId(7), "tok-123").expect("url");
        assert_eq!(url, "wss://chat.example.com/rooms/7/events?token=tok-123");

        let url = push_url("http://127.0.0.1:8080/", RoomId(7), "tok").expect("url");
        assert_eq!(url, "ws://127.0.0.1:8080/rooms/7/events?token=tok");
    }

    #[test]
    fn rejects_non_http_base_urls() {
        assert!(push_url("ftp://chat.example.com", RoomId(1), "tok").is_err());
    }
}
