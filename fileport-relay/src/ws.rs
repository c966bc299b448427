//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` with separate reader/writer halves.
//! Outbound connections (host agent, client) come from [`connect`]; the relay
//! wraps sockets it has already upgraded itself with [`from_upgraded`].

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Stream type of outbound connections.
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Next text frame, or `None` once the peer closed. Binary frames are
    /// accepted when they hold UTF-8; pings and pongs are skipped.
    pub async fn recv_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        log::debug!("[Ws] Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(tungstenite::Error::ConnectionClosed)) => return None,
                Some(Err(e)) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            }
        }
    }
}

/// Connect to a WebSocket URL and split the stream.
pub async fn connect(url: &str) -> Result<(WsWriter<ClientStream>, WsReader<ClientStream>)> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;
    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Wrap a socket whose HTTP upgrade has already been answered.
pub async fn from_upgraded<S>(stream: S) -> (WsWriter<S>, WsReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_stream = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (sink, stream) = ws_stream.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Convert an HTTP(S) URL to WS(S) scheme. `ws://` and `wss://` pass through.
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{url}")
    }
}
