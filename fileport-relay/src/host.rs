//! Host agent: registers as the relay's host and answers forwarded requests
//! from a local directory. Each request runs in its own task; all replies
//! share one writer.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fileport_core::chunk::effective_chunk_size;
use fileport_core::wire::{encode_chunk_frame, encode_end_frame, encode_error_frame};
use fileport_core::{
    ControlMessage, ErrorBody, FileAction, FileListing, Frame, RequestMessage, Role,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::files;
use crate::ws;

/// Connect to `relay_url` and serve `root` until the relay closes the connection.
pub async fn run(relay_url: String, root: PathBuf, chunk_size: usize) -> Result<()> {
    let root = tokio::fs::canonicalize(&root)
        .await
        .with_context(|| format!("host root {}", root.display()))?;
    let url = ws::http_to_ws_scheme(&relay_url);
    let (mut writer, mut reader) = ws::connect(&url).await?;
    writer
        .send_text(serde_json::to_string(&ControlMessage::Host)?)
        .await?;
    log::info!("[Host] Serving {} via {url}", root.display());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            writer.send_text(text).await?;
        }
        anyhow::Ok(())
    });

    while let Some(next) = reader.recv_text().await {
        let text = next?;
        match Frame::decode_from(&text, Role::Client) {
            Ok(Frame::Request(request)) => {
                let root = root.clone();
                let out = out_tx.clone();
                tokio::spawn(async move {
                    handle_request(&root, chunk_size, request.message, &out).await;
                });
            }
            Ok(other) => log::debug!("[Host] Ignoring {} frame", other.kind()),
            Err(e) => log::debug!("[Host] Undecodable frame: {e}"),
        }
    }
    log::info!("[Host] Relay closed the connection");
    writer_task.abort();
    Ok(())
}

/// Answer one request. Every outcome ends with a terminal frame.
pub async fn handle_request(
    root: &Path,
    chunk_size: usize,
    message: RequestMessage,
    out: &mpsc::UnboundedSender<String>,
) {
    let Some(request_id) = message.id().map(str::to_string) else {
        log::warn!("[Host] Request without id: {}", message.action.name());
        return;
    };
    log::debug!("[Host] {} {request_id}", message.action.name());
    match message.action {
        FileAction::GetFiles { path } => {
            let frame = match files::list_dir(root, path.as_deref()).await {
                Ok(files) => serde_json::to_string(&FileListing {
                    request_id: request_id.clone(),
                    files,
                })
                .unwrap_or_else(|e| {
                    encode_error_frame(
                        &ErrorBody::new("Error listing files")
                            .with_details(e.to_string())
                            .for_request(&request_id),
                    )
                }),
                Err(e) => encode_error_frame(&e.to_error_body().for_request(&request_id)),
            };
            let _ = out.send(frame);
        }
        FileAction::DownloadFile { path } => {
            if let Err(body) = stream_file(root, &path, &request_id, chunk_size, out).await {
                log::info!("[Host] {path}: {}", body.error);
                let _ = out.send(encode_error_frame(&body.for_request(&request_id)));
            }
        }
    }
}

async fn stream_file(
    root: &Path,
    requested: &str,
    request_id: &str,
    chunk_size: usize,
    out: &mpsc::UnboundedSender<String>,
) -> Result<(), ErrorBody> {
    let (path, size) = files::open_file(root, requested)
        .await
        .map_err(|e| e.to_error_body())?;
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| files::FileError::from(e).to_error_body())?;
    let mut buf = vec![0u8; effective_chunk_size(chunk_size)];
    let mut sent = 0u64;
    loop {
        let n = read_full(&mut file, &mut buf)
            .await
            .map_err(|e| files::FileError::from(e).to_error_body())?;
        if n == 0 {
            break;
        }
        sent += n as u64;
        if out.send(encode_chunk_frame(request_id, &buf[..n])).is_err() {
            return Ok(());
        }
        if n < buf.len() {
            break;
        }
    }
    log::debug!("[Host] Sent {sent} of {size} bytes for {request_id}");
    let _ = out.send(encode_end_frame(request_id));
    Ok(())
}

/// Fill `buf` unless EOF comes first.
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
