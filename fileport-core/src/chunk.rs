//! Chunk streams: split a payload into chunk frames, reassemble on receive.

use crate::protocol::ErrorBody;
use crate::wire::{self, Frame};

/// Default chunk size in bytes, before base64.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// Chunk size actually used for a requested size: zero means the default.
pub fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// Split a payload into fixed-size slices. A zero chunk size uses the default.
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(effective_chunk_size(chunk_size))
}

/// All frames for an in-memory payload: one chunk frame per slice, then the
/// end sentinel. An empty payload yields only the sentinel.
pub fn encode_stream(request_id: &str, data: &[u8], chunk_size: usize) -> Vec<String> {
    let mut frames: Vec<String> = split_into_chunks(data, chunk_size)
        .map(|chunk| wire::encode_chunk_frame(request_id, chunk))
        .collect();
    frames.push(wire::encode_end_frame(request_id));
    frames
}

/// Consumer-side state for one download.
#[derive(Debug)]
pub struct TransferState {
    request_id: String,
    received: Vec<u8>,
    chunks: usize,
    finished: bool,
}

/// Result of feeding one frame to a [`TransferState`].
#[derive(Debug)]
pub enum ChunkReceiveResult {
    /// Chunk appended; more to come.
    InProgress,
    /// End sentinel seen; the reassembled bytes.
    Complete(Vec<u8>),
    /// The transfer failed and will not complete.
    Failed(TransferError),
    /// Frame belongs to another request, or arrived after the transfer ended.
    Ignored,
}

impl TransferState {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            received: Vec::new(),
            chunks: 0,
            finished: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Chunk frames accepted so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Bytes reassembled so far.
    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one decoded frame. Chunks are appended in arrival order.
    pub fn on_frame(&mut self, frame: &Frame) -> ChunkReceiveResult {
        if self.finished || frame.request_id() != Some(self.request_id.as_str()) {
            return ChunkReceiveResult::Ignored;
        }
        match frame {
            Frame::Chunk { data, .. } => match wire::decode_chunk_data(data) {
                Ok(bytes) => {
                    self.received.extend_from_slice(&bytes);
                    self.chunks += 1;
                    ChunkReceiveResult::InProgress
                }
                Err(e) => self.fail(TransferError::Decode(e)),
            },
            Frame::End { .. } => {
                self.finished = true;
                ChunkReceiveResult::Complete(std::mem::take(&mut self.received))
            }
            Frame::Error(body) => self.fail(TransferError::Remote(body.clone())),
            // Hosts may describe a download in JSON before its chunks.
            Frame::Response { .. } | Frame::Control(_) | Frame::Request(_) => {
                ChunkReceiveResult::Ignored
            }
        }
    }

    fn fail(&mut self, err: TransferError) -> ChunkReceiveResult {
        self.finished = true;
        self.received.clear();
        ChunkReceiveResult::Failed(err)
    }
}

/// Why a download did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("chunk payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("host error: {0}")]
    Remote(ErrorBody),
}
