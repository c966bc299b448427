//! fileport wire protocol: message shapes exchanged through the relay.

use serde::{Deserialize, Serialize};

/// Prefix of the end-of-stream sentinel frame: `__END__:<requestId>`.
pub const END_SENTINEL: &str = "__END__";

/// Separates the request id from the payload in chunk and end frames.
pub const FRAME_DELIMITER: char = ':';

/// Longest request id the relay accepts from a client.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// First message a connection sends to claim its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Host,
    Client,
}

/// What a client asks the host to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum FileAction {
    /// List a directory. No path means the host's root.
    #[serde(rename = "getFiles")]
    GetFiles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Stream one file back as chunk frames.
    #[serde(rename = "downloadFile")]
    DownloadFile { path: String },
}

impl FileAction {
    pub const GET_FILES: &'static str = "getFiles";
    pub const DOWNLOAD_FILE: &'static str = "downloadFile";

    pub fn name(&self) -> &'static str {
        match self {
            FileAction::GetFiles { .. } => Self::GET_FILES,
            FileAction::DownloadFile { .. } => Self::DOWNLOAD_FILE,
        }
    }
}

/// Client request. Clients may pick their own id (`reqId`); the relay stamps
/// `requestId` on the copy it forwards to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(flatten)]
    pub action: FileAction,
    #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestMessage {
    pub fn new(action: FileAction) -> Self {
        Self {
            action,
            req_id: None,
            request_id: None,
        }
    }

    /// The correlating id, preferring the relay-stamped `requestId`.
    pub fn id(&self) -> Option<&str> {
        self.request_id.as_deref().or(self.req_id.as_deref())
    }
}

/// One entry of a directory listing. Directory names carry a trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
}

/// Correlated listing response sent by the host for `getFiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub request_id: String,
    pub files: Vec<FileEntry>,
}

/// Error frame body. Terminal for the request it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            request_id: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{} ({details})", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// A request id is usable when it survives the `<id>:<payload>` chunk framing.
pub fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id != END_SENTINEL
        && !id.starts_with(['{', '['])
        && !id
            .chars()
            .any(|c| c == FRAME_DELIMITER || c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_parse() {
        let host: ControlMessage = serde_json::from_str(r#"{"type":"host"}"#).unwrap();
        let client: ControlMessage = serde_json::from_str(r#"{"type":"client"}"#).unwrap();
        assert_eq!(host, ControlMessage::Host);
        assert_eq!(client, ControlMessage::Client);
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"admin"}"#).is_err());
    }

    #[test]
    fn request_without_id() {
        let req: RequestMessage = serde_json::from_str(r#"{"action":"getFiles"}"#).unwrap();
        assert_eq!(req.action, FileAction::GetFiles { path: None });
        assert_eq!(req.id(), None);
    }

    #[test]
    fn download_request_with_client_id() {
        let req: RequestMessage =
            serde_json::from_str(r#"{"action":"downloadFile","path":"a/b.txt","reqId":"r7"}"#)
                .unwrap();
        assert_eq!(
            req.action,
            FileAction::DownloadFile {
                path: "a/b.txt".into()
            }
        );
        assert_eq!(req.id(), Some("r7"));
    }

    #[test]
    fn forwarded_request_prefers_stamped_id() {
        let req: RequestMessage = serde_json::from_str(
            r#"{"action":"getFiles","reqId":"mine","requestId":"stamped"}"#,
        )
        .unwrap();
        assert_eq!(req.id(), Some("stamped"));
    }

    #[test]
    fn download_requires_path() {
        assert!(serde_json::from_str::<RequestMessage>(r#"{"action":"downloadFile"}"#).is_err());
        assert!(serde_json::from_str::<RequestMessage>(r#"{"action":"deleteAll"}"#).is_err());
    }

    #[test]
    fn file_entry_uses_camel_case() {
        let entry = FileEntry {
            path: "docs/".into(),
            name: "docs/".into(),
            is_dir: true,
            size: 0,
            last_modified: 1_700_000_000_000,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["isDir"], true);
        assert_eq!(v["lastModified"], 1_700_000_000_000u64);
    }

    #[test]
    fn error_body_skips_absent_fields() {
        let body = ErrorBody::new("File not found");
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"File not found"}"#
        );
        let body = ErrorBody::new("Read failed")
            .with_details("disk on fire")
            .for_request("r1");
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["details"], "disk on fire");
        assert_eq!(v["requestId"], "r1");
    }

    #[test]
    fn error_body_display() {
        assert_eq!(ErrorBody::new("File not found").to_string(), "File not found");
        let body = ErrorBody::new("Error reading file").with_details("EIO");
        assert_eq!(body.to_string(), "Error reading file (EIO)");
    }

    #[test]
    fn action_names_match_wire_tags() {
        let get = serde_json::to_value(FileAction::GetFiles { path: None }).unwrap();
        assert_eq!(get["action"], FileAction::GET_FILES);
        let dl = FileAction::DownloadFile { path: "a".into() };
        assert_eq!(serde_json::to_value(&dl).unwrap()["action"], dl.name());
    }

    #[test]
    fn request_id_validity() {
        assert!(is_valid_request_id("r1"));
        assert!(is_valid_request_id("3f2b9c0e8d7a4b6c9e1f0a2b3c4d5e6f"));
        assert!(!is_valid_request_id(""));
        assert!(!is_valid_request_id("a:b"));
        assert!(!is_valid_request_id("has space"));
        assert!(!is_valid_request_id(END_SENTINEL));
        assert!(!is_valid_request_id("{oops"));
        assert!(!is_valid_request_id(&"x".repeat(MAX_REQUEST_ID_LEN + 1)));
    }
}
