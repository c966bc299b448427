//! Plain HTTP on the relay port: parse the request head, then either answer
//! the WebSocket upgrade or serve the status page and local file endpoints.

use std::path::Path;

use anyhow::{Context, Result};
use fileport_core::RelayStatus;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::files::{self, FileError};

/// Largest request head accepted.
const MAX_HEAD_LEN: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

/// The parts of an HTTP request head the relay looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    upgrade_websocket: bool,
    connection_upgrade: bool,
    websocket_key: Option<String>,
    websocket_version: Option<String>,
}

impl RequestHead {
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == "GET" && self.upgrade_websocket && self.connection_upgrade
    }
}

/// Parse a complete request head. `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(len) = req.parse(buf)? else {
        return Ok(None);
    };
    let mut head = RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        path: req.path.unwrap_or("/").to_string(),
        upgrade_websocket: false,
        connection_upgrade: false,
        websocket_key: None,
        websocket_version: None,
    };
    for h in req.headers.iter() {
        let value = String::from_utf8_lossy(h.value).trim().to_string();
        if h.name.eq_ignore_ascii_case("Upgrade") {
            head.upgrade_websocket = value.eq_ignore_ascii_case("websocket");
        } else if h.name.eq_ignore_ascii_case("Connection") {
            head.connection_upgrade = value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            head.websocket_key = Some(value);
        } else if h.name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            head.websocket_version = Some(value);
        }
    }
    Ok(Some((head, len)))
}

/// Read until a full request head is buffered. `Ok(None)` if the peer hung
/// up first. Bytes past the head are returned alongside it.
pub async fn read_head<S>(stream: &mut S) -> Result<Option<(RequestHead, Vec<u8>)>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_head(&buf) {
            Ok(Some((head, len))) => return Ok(Some((head, buf.split_off(len)))),
            Ok(None) if buf.len() < MAX_HEAD_LEN => continue,
            Ok(None) => {
                write_response(stream, 431, "Request Header Fields Too Large", "text/plain", b"")
                    .await?;
                anyhow::bail!("request head exceeds {MAX_HEAD_LEN} bytes");
            }
            Err(e) => {
                write_response(stream, 400, "Bad Request", "text/plain", b"").await?;
                return Err(e).context("malformed HTTP request");
            }
        }
    }
}

/// Answer a WebSocket upgrade. Returns false (after replying with an error)
/// if the handshake headers are unusable. `early` holds bytes read past the
/// head; a client must wait for the 101 before sending frames, so any are refused.
pub async fn accept_upgrade<S>(stream: &mut S, head: &RequestHead, early: &[u8]) -> Result<bool>
where
    S: AsyncWrite + Unpin,
{
    if !early.is_empty() {
        write_response(stream, 400, "Bad Request", "text/plain", b"data before handshake")
            .await?;
        return Ok(false);
    }
    if head.websocket_version.as_deref() != Some("13") {
        let resp = "HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        stream.write_all(resp.as_bytes()).await?;
        return Ok(false);
    }
    let Some(key) = head.websocket_key.as_deref() else {
        write_response(stream, 400, "Bad Request", "text/plain", b"missing Sec-WebSocket-Key")
            .await?;
        return Ok(false);
    };
    let resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(resp.as_bytes()).await?;
    stream.flush().await?;
    Ok(true)
}

/// Serve one plain HTTP request and close.
pub async fn respond<S>(
    stream: &mut S,
    head: &RequestHead,
    files_dir: &Path,
    status: &RelayStatus,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if head.method != "GET" {
        return write_json(stream, 405, "Method Not Allowed", r#"{"error":"Method not allowed"}"#)
            .await;
    }
    let path = head.path.split('?').next().unwrap_or("/");
    match path {
        "/" => {
            let body = status_page(status);
            write_response(stream, 200, "OK", "text/html; charset=utf-8", body.as_bytes()).await
        }
        "/status" => {
            let body = serde_json::to_string(status)?;
            write_json(stream, 200, "OK", &body).await
        }
        "/files" => match files::list_names(files_dir).await {
            Ok(names) => write_json(stream, 200, "OK", &serde_json::to_string(&names)?).await,
            Err(e) => {
                log::warn!("[Http] Unable to list {}: {e}", files_dir.display());
                write_json(
                    stream,
                    500,
                    "Internal Server Error",
                    r#"{"error":"Unable to list files"}"#,
                )
                .await
            }
        },
        _ => match path.strip_prefix("/download/") {
            Some(name) => download(stream, files_dir, name).await,
            None => write_json(stream, 404, "Not Found", r#"{"error":"Not found"}"#).await,
        },
    }
}

async fn download<S>(stream: &mut S, files_dir: &Path, name: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let not_found = r#"{"error":"File not found"}"#;
    if name.is_empty() || name.contains(['/', '\\']) {
        return write_json(stream, 404, "Not Found", not_found).await;
    }
    let (path, size) = match files::open_file(files_dir, name).await {
        Ok(found) => found,
        Err(FileError::Io(e)) => {
            log::warn!("[Http] Download of {name} failed: {e}");
            return write_json(stream, 500, "Internal Server Error", r#"{"error":"Error reading file"}"#)
                .await;
        }
        Err(_) => return write_json(stream, 404, "Not Found", not_found).await,
    };
    let mut file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"{}\"\r\nContent-Length: {size}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        name.replace('"', "")
    );
    stream.write_all(head.as_bytes()).await?;
    tokio::io::copy(&mut file, stream).await?;
    stream.flush().await?;
    Ok(())
}

fn status_page(status: &RelayStatus) -> String {
    format!(
        "<h1>File Server</h1>\n\
         <p>Use <a href=\"/files\">/files</a> to see file list</p>\n\
         <p>Host: {}</p>\n<p>Clients: {}</p>\n<p>Pending requests: {}</p>\n",
        if status.host_connected { "connected" } else { "not connected" },
        status.clients,
        status.pending_requests,
    )
}

async fn write_json<S>(stream: &mut S, code: u16, reason: &str, body: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_response(stream, code, reason, "application/json", body.as_bytes()).await
}

async fn write_response<S>(
    stream: &mut S,
    code: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
