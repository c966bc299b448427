//! Command-line client: one request per connection, answered through the relay.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use fileport_core::router::new_request_id;
use fileport_core::{
    ChunkReceiveResult, ControlMessage, FileAction, FileEntry, FileListing, Frame, RequestMessage,
    Role, TransferState,
};

use crate::ws::{self, ClientStream, WsReader};

/// Ask the host for a directory listing.
pub async fn list(relay_url: &str, path: Option<String>, timeout: Duration) -> Result<Vec<FileEntry>> {
    let (request_id, mut reader) = send_request(relay_url, FileAction::GetFiles { path }).await?;
    with_timeout(timeout, await_listing(&mut reader, &request_id)).await
}

/// Download one file and return its bytes.
pub async fn download(relay_url: &str, path: &str, timeout: Duration) -> Result<Vec<u8>> {
    let action = FileAction::DownloadFile {
        path: path.to_string(),
    };
    let (request_id, mut reader) = send_request(relay_url, action).await?;
    let mut transfer = TransferState::new(request_id);
    with_timeout(timeout, await_transfer(&mut reader, &mut transfer)).await
}

async fn await_listing(
    reader: &mut WsReader<ClientStream>,
    request_id: &str,
) -> Result<Vec<FileEntry>> {
    while let Some(frame) = next_frame(reader).await? {
        if frame.request_id() != Some(request_id) {
            continue;
        }
        match frame {
            Frame::Response { body, .. } => {
                let listing: FileListing = serde_json::from_value(serde_json::Value::Object(body))
                    .context("malformed listing")?;
                return Ok(listing.files);
            }
            Frame::Error(body) => bail!("host error: {body}"),
            other => log::debug!("[Client] Ignoring {} frame", other.kind()),
        }
    }
    bail!("relay closed the connection")
}

async fn await_transfer(
    reader: &mut WsReader<ClientStream>,
    transfer: &mut TransferState,
) -> Result<Vec<u8>> {
    while let Some(frame) = next_frame(reader).await? {
        match transfer.on_frame(&frame) {
            ChunkReceiveResult::InProgress | ChunkReceiveResult::Ignored => {}
            ChunkReceiveResult::Complete(bytes) => {
                log::debug!(
                    "[Client] {} bytes in {} chunk(s)",
                    bytes.len(),
                    transfer.chunk_count()
                );
                return Ok(bytes);
            }
            ChunkReceiveResult::Failed(e) => return Err(e.into()),
        }
    }
    bail!("relay closed the connection")
}

/// Next decodable frame; `None` once the relay hangs up. Everything the
/// relay passes on was written by the host.
async fn next_frame(reader: &mut WsReader<ClientStream>) -> Result<Option<Frame>> {
    while let Some(next) = reader.recv_text().await {
        match Frame::decode_from(&next?, Role::Host) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => log::debug!("[Client] Undecodable frame: {e}"),
        }
    }
    Ok(None)
}

async fn send_request(
    relay_url: &str,
    action: FileAction,
) -> Result<(String, WsReader<ClientStream>)> {
    let url = ws::http_to_ws_scheme(relay_url);
    let (mut writer, reader) = ws::connect(&url).await?;
    writer
        .send_text(serde_json::to_string(&ControlMessage::Client)?)
        .await?;
    let request_id = new_request_id();
    let request = RequestMessage {
        req_id: Some(request_id.clone()),
        ..RequestMessage::new(action)
    };
    log::debug!("[Client] {} {request_id}", request.action.name());
    writer.send_text(serde_json::to_string(&request)?).await?;
    // The write half is dropped here; the read half keeps the socket open.
    Ok((request_id, reader))
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => bail!(
            "no answer within {}s (is a host connected?)",
            timeout.as_secs_f32()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_relay_is_an_error() {
        let err = list("ws://127.0.0.1:1/", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connect"), "{err:#}");
    }
}
