//! Framing: every relay message is one text frame, typed once here.
//!
//! JSON objects carry control, request, response and error messages. Binary
//! payloads travel as `<requestId>:<base64>` chunk frames closed by an
//! `__END__:<requestId>` sentinel.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::protocol::{
    is_valid_request_id, ControlMessage, ErrorBody, FileAction, RequestMessage, END_SENTINEL,
    FRAME_DELIMITER,
};
use crate::registry::Role;

/// A decoded relay frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `{"type": "host" | "client"}`.
    Control(ControlMessage),
    /// `{"action": ...}` from a client, or as forwarded to the host.
    Request(RequestFrame),
    /// `<requestId>:<base64>`; `data` is still encoded.
    Chunk { request_id: String, data: String },
    /// `__END__:<requestId>`.
    End { request_id: String },
    /// `{"error": ...}`, optionally correlated.
    Error(ErrorBody),
    /// Any other JSON object carrying `requestId` (e.g. a file listing).
    /// From the host, every object with `requestId` lands here or in `Error`.
    Response {
        request_id: String,
        body: Map<String, Value>,
    },
}

/// A request together with the JSON object it came from, so the relay can
/// forward the client's fields untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub message: RequestMessage,
    pub raw: Map<String, Value>,
}

impl RequestFrame {
    /// Text of the request as forwarded to the host: the original object with
    /// `requestId` set.
    pub fn stamped(&self, request_id: &str) -> String {
        let mut raw = self.raw.clone();
        raw.insert("requestId".into(), Value::String(request_id.to_string()));
        Value::Object(raw).to_string()
    }
}

impl Frame {
    /// Request id this frame belongs to, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Frame::Control(_) => None,
            Frame::Request(r) => r.message.id(),
            Frame::Chunk { request_id, .. }
            | Frame::End { request_id }
            | Frame::Response { request_id, .. } => Some(request_id),
            Frame::Error(e) => e.request_id.as_deref(),
        }
    }

    /// True when this frame finishes a request issued as `action`. A JSON
    /// response only finishes a listing; downloads run until their end
    /// sentinel or an error.
    pub fn completes(&self, action: &str) -> bool {
        match self {
            Frame::End { .. } | Frame::Error(_) => true,
            Frame::Response { .. } => action == FileAction::GET_FILES,
            Frame::Chunk { .. } | Frame::Control(_) | Frame::Request(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Control(_) => "control",
            Frame::Request(_) => "request",
            Frame::Chunk { .. } => "chunk",
            Frame::End { .. } => "end",
            Frame::Error(_) => "error",
            Frame::Response { .. } => "response",
        }
    }

    /// Decode a text frame whose sender is not known to hold a role.
    pub fn decode(text: &str) -> Result<Frame, FrameDecodeError> {
        Self::decode_from(text, Role::Unregistered)
    }

    /// Decode a text frame sent by a connection holding `sender`. Chunk
    /// payloads are not base64-checked here; the relay forwards them as-is
    /// and the consumer decodes.
    ///
    /// JSON objects are read by sender: a host object with a string
    /// `requestId` is always a reply, a client object with `action` is always
    /// a request, and otherwise `type` marks a control message.
    pub fn decode_from(text: &str, sender: Role) -> Result<Frame, FrameDecodeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FrameDecodeError::Empty);
        }
        if let Some(rest) = trimmed.strip_prefix(END_SENTINEL) {
            if let Some(id) = rest.strip_prefix(FRAME_DELIMITER) {
                if !is_valid_request_id(id) {
                    return Err(FrameDecodeError::MissingRequestId);
                }
                return Ok(Frame::End {
                    request_id: id.to_string(),
                });
            }
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return decode_json(trimmed, sender);
        }
        let (id, data) = text
            .split_once(FRAME_DELIMITER)
            .ok_or(FrameDecodeError::MalformedChunk)?;
        if !is_valid_request_id(id) {
            return Err(FrameDecodeError::MalformedChunk);
        }
        Ok(Frame::Chunk {
            request_id: id.to_string(),
            data: data.to_string(),
        })
    }
}

fn decode_json(text: &str, sender: Role) -> Result<Frame, FrameDecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(FrameDecodeError::NotAnObject);
    };
    let correlated = matches!(map.get("requestId"), Some(Value::String(_)));
    match sender {
        Role::Host if correlated => decode_reply(map),
        Role::Client if map.contains_key("action") => decode_request(map),
        _ if map.contains_key("type") => {
            let control: ControlMessage = serde_json::from_value(Value::Object(map))?;
            Ok(Frame::Control(control))
        }
        _ if map.contains_key("action") => decode_request(map),
        _ => decode_reply(map),
    }
}

fn decode_request(map: Map<String, Value>) -> Result<Frame, FrameDecodeError> {
    let message: RequestMessage = serde_json::from_value(Value::Object(map.clone()))?;
    Ok(Frame::Request(RequestFrame { message, raw: map }))
}

/// An error object (string `error`) or a correlated response. Other keys are
/// left for the receiver; the relay forwards the original text.
fn decode_reply(map: Map<String, Value>) -> Result<Frame, FrameDecodeError> {
    let text_field = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
    if let Some(error) = text_field("error") {
        return Ok(Frame::Error(ErrorBody {
            error,
            details: text_field("details"),
            request_id: text_field("requestId"),
        }));
    }
    let request_id = text_field("requestId").ok_or(FrameDecodeError::Uncorrelated)?;
    Ok(Frame::Response {
        request_id,
        body: map,
    })
}

/// Encode one chunk of bytes: `<requestId>:<base64>`.
pub fn encode_chunk_frame(request_id: &str, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(request_id.len() + 1 + bytes.len().div_ceil(3) * 4);
    out.push_str(request_id);
    out.push(FRAME_DELIMITER);
    STANDARD.encode_string(bytes, &mut out);
    out
}

/// Encode the end-of-stream sentinel for `request_id`.
pub fn encode_end_frame(request_id: &str) -> String {
    format!("{END_SENTINEL}{FRAME_DELIMITER}{request_id}")
}

/// Encode an error frame. Absent optional fields are omitted.
pub fn encode_error_frame(body: &ErrorBody) -> String {
    let mut map = Map::new();
    map.insert("error".into(), Value::String(body.error.clone()));
    if let Some(details) = &body.details {
        map.insert("details".into(), Value::String(details.clone()));
    }
    if let Some(id) = &body.request_id {
        map.insert("requestId".into(), Value::String(id.clone()));
    }
    Value::Object(map).to_string()
}

/// Decode the payload of a chunk frame.
pub fn decode_chunk_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data.trim_end())
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("empty frame")]
    Empty,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("json frame is not an object")]
    NotAnObject,
    #[error("json frame carries no requestId")]
    Uncorrelated,
    #[error("malformed chunk frame")]
    MalformedChunk,
    #[error("end sentinel without a valid request id")]
    MissingRequestId,
}
