//! fileport relay protocol: one host, many clients, correlated responses.
//! Transport-driven: no I/O; the server passes connection events and receives actions.

pub mod chunk;
pub mod core;
pub mod negotiate;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod wire;

pub use chunk::{ChunkReceiveResult, TransferError, TransferState, DEFAULT_CHUNK_SIZE};
pub use core::{MessageError, OutboundAction, RelayConfig, RelayCore, RelayStatus};
pub use protocol::{ControlMessage, ErrorBody, FileAction, FileEntry, FileListing, RequestMessage};
pub use registry::{ConnId, Role};
pub use wire::{Frame, FrameDecodeError};
