//! Transport-driven API: RelayCore receives connection events from the server
//! and returns the frames to send.

use serde::Serialize;

use crate::negotiate::{negotiate, Negotiation};
use crate::protocol::ErrorBody;
use crate::registry::{ConnId, ConnectionRegistry, Role};
use crate::router::RequestRouter;
use crate::wire::{encode_error_frame, Frame, FrameDecodeError};

/// Default request timeout in ticks.
pub const DEFAULT_REQUEST_TIMEOUT_TICKS: u64 = 60;

/// Default cap on requests awaiting a host answer.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;

/// Relay tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Ticks a forwarded request may wait before the client is told it timed out.
    pub request_timeout_ticks: u64,
    pub max_pending_requests: usize,
    /// On host loss, send every still-connected waiting client an error frame
    /// instead of leaving it to its own timeout.
    pub notify_on_host_loss: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ticks: DEFAULT_REQUEST_TIMEOUT_TICKS,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            notify_on_host_loss: false,
        }
    }
}

/// Snapshot for status pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub host_connected: bool,
    pub clients: usize,
    pub connections: usize,
    pub pending_requests: usize,
}

/// Main coordinator. One instance per relay; the server feeds it events
/// from a single task, so it needs no locking.
#[derive(Debug)]
pub struct RelayCore {
    registry: ConnectionRegistry,
    router: RequestRouter,
    config: RelayConfig,
    tick_count: u64,
}

impl RelayCore {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            router: RequestRouter::new(config.max_pending_requests),
            config,
            tick_count: 0,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            host_connected: self.registry.current_host().is_some(),
            clients: self.registry.client_count(),
            connections: self.registry.connection_count(),
            pending_requests: self.registry.pending_count(),
        }
    }

    /// A transport connection was accepted.
    pub fn on_connection_opened(&mut self, conn: ConnId) {
        self.registry.open(conn, self.tick_count);
    }

    /// Process one text frame from `conn`. `Err` means the frame was dropped;
    /// the connection stays usable and the server only logs the reason.
    pub fn on_message_received(
        &mut self,
        conn: ConnId,
        text: &str,
    ) -> Result<Vec<OutboundAction>, MessageError> {
        let role = self
            .registry
            .role(conn)
            .ok_or(MessageError::UnknownConnection(conn))?;
        let frame = Frame::decode_from(text, role)?;

        match (role, frame) {
            (_, Frame::Control(control)) => match negotiate(&mut self.registry, conn, control) {
                Negotiation::RegisteredHost | Negotiation::RegisteredClient => Ok(vec![]),
                Negotiation::HostSlotTaken { current } => Err(MessageError::HostTaken(current)),
                Negotiation::AlreadyRegistered(role) => {
                    Err(MessageError::AlreadyRegistered(conn, role))
                }
                Negotiation::UnknownConnection => Err(MessageError::UnknownConnection(conn)),
            },
            (Role::Unregistered, _) => Err(MessageError::Unregistered(conn)),
            (Role::Client, Frame::Request(request)) => {
                self.router
                    .route_client_request(&mut self.registry, conn, &request, self.tick_count)
            }
            (Role::Client, frame) => Err(MessageError::Unexpected {
                role: Role::Client,
                kind: frame.kind(),
            }),
            (Role::Host, frame) => self.router.route_host_frame(&mut self.registry, &frame, text),
        }
    }

    /// A transport connection closed. Host loss discards every pending
    /// request; clients are only told when `notify_on_host_loss` is set.
    pub fn on_connection_closed(&mut self, conn: ConnId) -> Vec<OutboundAction> {
        let Some(removed) = self.registry.remove_connection(conn) else {
            return vec![];
        };
        let Some(mut orphaned) = removed.orphaned else {
            return vec![];
        };
        if !self.config.notify_on_host_loss {
            return vec![];
        }
        let mut lost: Vec<_> = orphaned.drain().collect();
        lost.sort_by_key(|(_, p)| p.issued_tick);
        lost.into_iter()
            .filter(|(_, p)| self.registry.is_open_client(p.client))
            .map(|(id, p)| {
                OutboundAction::Send(
                    p.client,
                    encode_error_frame(&ErrorBody::new("host disconnected").for_request(id)),
                )
            })
            .collect()
    }

    /// Periodic tick: evict requests the host never finished.
    pub fn tick(&mut self) -> Vec<OutboundAction> {
        self.tick_count = self.tick_count.saturating_add(1);
        let now = self.tick_count;
        let timeout = self.config.request_timeout_ticks;
        let Some(pending) = self.registry.host_pending_mut() else {
            return vec![];
        };
        let expired = pending.take_expired(now, timeout);
        expired
            .into_iter()
            .filter(|(_, p)| self.registry.is_open_client(p.client))
            .map(|(id, p)| {
                OutboundAction::Send(
                    p.client,
                    encode_error_frame(
                        &ErrorBody::new("request timed out")
                            .with_details(format!("no answer from host for {}", p.action))
                            .for_request(id),
                    ),
                )
            })
            .collect()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

impl Default for RelayCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an inbound frame produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),
    #[error("{0} has not registered a role")]
    Unregistered(ConnId),
    #[error("host slot already held by {0}")]
    HostTaken(ConnId),
    #[error("{0} is already registered as {1:?}")]
    AlreadyRegistered(ConnId, Role),
    #[error("no host registered")]
    NoHost,
    #[error("unexpected {kind} frame from {role:?}")]
    Unexpected { role: Role, kind: &'static str },
    #[error("frame carries no request id")]
    Uncorrelated,
    #[error("unknown request id {0}")]
    UnknownRequest(String),
    #[error("client for request {0} is gone")]
    ClientGone(String),
}

/// Action for the server to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Send a text frame to a connection.
    Send(ConnId, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{encode_stream, ChunkReceiveResult, TransferState};
    use crate::wire::encode_chunk_frame;

    const HOST: ConnId = ConnId(1);

    fn core_with_host() -> RelayCore {
        let mut core = RelayCore::new();
        core.on_connection_opened(HOST);
        core.on_message_received(HOST, r#"{"type":"host"}"#).unwrap();
        core
    }

    fn add_client(core: &mut RelayCore, id: u64) -> ConnId {
        let conn = ConnId(id);
        core.on_connection_opened(conn);
        core.on_message_received(conn, r#"{"type":"client"}"#).unwrap();
        conn
    }

    /// Send a request from `client`; return the id stamped on the host copy.
    fn request(core: &mut RelayCore, client: ConnId, text: &str) -> String {
        let actions = core.on_message_received(client, text).unwrap();
        assert_eq!(actions.len(), 1);
        let OutboundAction::Send(to, forwarded) = &actions[0];
        assert_eq!(*to, HOST);
        let v: serde_json::Value = serde_json::from_str(forwarded).unwrap();
        v["requestId"].as_str().unwrap().to_string()
    }

    fn host_says(core: &mut RelayCore, text: &str) -> Vec<OutboundAction> {
        core.on_message_received(HOST, text).unwrap()
    }

    #[test]
    fn listing_forwarded_unmodified() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"getFiles"}"#);
        let reply = format!(
            r#"{{"requestId":"{id}","files":[{{"name":"a.txt","isDir":false,"size":10}}]}}"#
        );
        let actions = host_says(&mut core, &reply);
        assert_eq!(actions, vec![OutboundAction::Send(client, reply)]);
        assert_eq!(core.status().pending_requests, 0);
    }

    #[test]
    fn concurrent_clients_receive_only_their_frames() {
        let mut core = core_with_host();
        let clients: Vec<ConnId> = (2..6).map(|i| add_client(&mut core, i)).collect();
        let mut streams = Vec::new();
        for (n, &c) in clients.iter().enumerate() {
            let id = request(
                &mut core,
                c,
                &format!(r#"{{"action":"downloadFile","path":"f{n}"}}"#),
            );
            let payload: Vec<u8> = (0..200u32).map(|i| (i as u8).wrapping_mul(n as u8 + 1)).collect();
            streams.push((c, id.clone(), payload.clone(), encode_stream(&id, &payload, 50)));
        }

        // Interleave every stream frame by frame, as a busy host would.
        let mut inbox: Vec<(ConnId, String)> = Vec::new();
        let longest = streams.iter().map(|s| s.3.len()).max().unwrap();
        for i in 0..longest {
            for (_, _, _, frames) in &streams {
                if let Some(f) = frames.get(i) {
                    for OutboundAction::Send(to, text) in host_says(&mut core, f) {
                        inbox.push((to, text));
                    }
                }
            }
        }

        for (client, id, payload, _) in &streams {
            let mut state = TransferState::new(id.clone());
            let mut result = None;
            for (to, text) in inbox.iter().filter(|(to, _)| to == client) {
                let frame = Frame::decode(text).unwrap();
                assert_eq!(frame.request_id(), Some(id.as_str()), "frame sent to {to}");
                if let ChunkReceiveResult::Complete(bytes) = state.on_frame(&frame) {
                    result = Some(bytes);
                }
            }
            assert_eq!(result.as_ref(), Some(payload));
        }
        assert_eq!(core.status().pending_requests, 0);
    }

    #[test]
    fn second_host_does_not_replace_first() {
        let mut core = core_with_host();
        let intruder = ConnId(9);
        core.on_connection_opened(intruder);
        let r = core.on_message_received(intruder, r#"{"type":"host"}"#);
        assert!(matches!(r, Err(MessageError::HostTaken(HOST))));
        assert_eq!(core.registry().role(intruder), Some(Role::Unregistered));
        assert_eq!(core.status().clients, 0);

        // The intruder's requests are inert, the real host keeps routing.
        let r = core.on_message_received(intruder, r#"{"action":"getFiles"}"#);
        assert!(matches!(r, Err(MessageError::Unregistered(_))));
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"getFiles"}"#);
        let reply = format!(r#"{{"requestId":"{id}","files":[]}}"#);
        assert_eq!(
            host_says(&mut core, &reply),
            vec![OutboundAction::Send(client, reply)]
        );
    }

    #[test]
    fn unregistered_and_malformed_are_ignored() {
        let mut core = core_with_host();
        let conn = ConnId(3);
        core.on_connection_opened(conn);
        assert!(matches!(
            core.on_message_received(conn, "garbage"),
            Err(MessageError::Decode(_))
        ));
        assert!(matches!(
            core.on_message_received(conn, r#"{"action":"getFiles"}"#),
            Err(MessageError::Unregistered(_))
        ));
        // Registration may come after other traffic.
        core.on_message_received(conn, r#"{"type":"client"}"#).unwrap();
        assert!(core.registry().is_open_client(conn));
        assert!(matches!(
            core.on_message_received(conn, "{not json"),
            Err(MessageError::Decode(_))
        ));
        assert!(core.registry().is_open_client(conn));
    }

    #[test]
    fn unknown_connection_rejected() {
        let mut core = RelayCore::new();
        assert!(matches!(
            core.on_message_received(ConnId(42), r#"{"type":"client"}"#),
            Err(MessageError::UnknownConnection(_))
        ));
    }

    #[test]
    fn client_cannot_send_host_frames() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let r = core.on_message_received(client, &encode_chunk_frame("x", b"y"));
        assert!(matches!(
            r,
            Err(MessageError::Unexpected {
                role: Role::Client,
                kind: "chunk"
            })
        ));
    }

    #[test]
    fn host_cannot_issue_requests() {
        let mut core = core_with_host();
        let r = core.on_message_received(HOST, r#"{"action":"getFiles"}"#);
        assert!(matches!(r, Err(MessageError::Unexpected { .. })));
    }

    #[test]
    fn request_without_host_is_dropped() {
        let mut core = RelayCore::new();
        let client = add_client(&mut core, 2);
        let r = core.on_message_received(client, r#"{"action":"getFiles"}"#);
        assert!(matches!(r, Err(MessageError::NoHost)));
    }

    #[test]
    fn host_loss_is_silent_by_default() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        request(&mut core, client, r#"{"action":"downloadFile","path":"big"}"#);
        assert!(core.on_connection_closed(HOST).is_empty());
        assert_eq!(core.status(), RelayStatus {
            host_connected: false,
            clients: 1,
            connections: 1,
            pending_requests: 0,
        });
        // Nothing pending any more, so ticking never produces a terminal frame.
        for _ in 0..(DEFAULT_REQUEST_TIMEOUT_TICKS + 2) {
            assert!(core.tick().is_empty());
        }
    }

    #[test]
    fn host_loss_notifies_when_configured() {
        let mut core = RelayCore::with_config(RelayConfig {
            notify_on_host_loss: true,
            ..RelayConfig::default()
        });
        core.on_connection_opened(HOST);
        core.on_message_received(HOST, r#"{"type":"host"}"#).unwrap();
        let a = add_client(&mut core, 2);
        let b = add_client(&mut core, 3);
        request(&mut core, a, r#"{"action":"getFiles","reqId":"ra"}"#);
        request(&mut core, b, r#"{"action":"getFiles","reqId":"rb"}"#);
        core.on_connection_closed(b);

        let actions = core.on_connection_closed(HOST);
        assert_eq!(actions.len(), 1);
        let OutboundAction::Send(to, text) = &actions[0];
        assert_eq!(*to, a);
        let v: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(v["error"], "host disconnected");
        assert_eq!(v["requestId"], "ra");
    }

    #[test]
    fn timeout_evicts_and_notifies_once() {
        let mut core = RelayCore::with_config(RelayConfig {
            request_timeout_ticks: 2,
            ..RelayConfig::default()
        });
        core.on_connection_opened(HOST);
        core.on_message_received(HOST, r#"{"type":"host"}"#).unwrap();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"getFiles"}"#);

        assert!(core.tick().is_empty());
        assert!(core.tick().is_empty());
        let actions = core.tick();
        assert_eq!(actions.len(), 1);
        let OutboundAction::Send(to, text) = &actions[0];
        assert_eq!(*to, client);
        let v: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(v["error"], "request timed out");
        assert_eq!(v["requestId"], id.as_str());
        assert!(core.tick().is_empty());
        assert_eq!(core.status().pending_requests, 0);

        // A late answer for the evicted id goes nowhere.
        let late = format!(r#"{{"requestId":"{id}","files":[]}}"#);
        assert!(matches!(
            core.on_message_received(HOST, &late),
            Err(MessageError::UnknownRequest(_))
        ));
    }

    #[test]
    fn departed_client_entry_reclaimed_by_completion() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"downloadFile","path":"x"}"#);
        assert!(core.on_connection_closed(client).is_empty());
        // Still pending until the stream finishes; frames are filtered.
        assert_eq!(core.status().pending_requests, 1);
        let chunk = encode_chunk_frame(&id, b"data");
        assert!(matches!(
            core.on_message_received(HOST, &chunk),
            Err(MessageError::ClientGone(_))
        ));
        let end = crate::wire::encode_end_frame(&id);
        assert!(core.on_message_received(HOST, &end).is_err());
        assert_eq!(core.status().pending_requests, 0);
    }

    #[test]
    fn one_client_many_outstanding_requests() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let first = request(&mut core, client, r#"{"action":"getFiles"}"#);
        let second = request(&mut core, client, r#"{"action":"downloadFile","path":"a"}"#);
        assert_ne!(first, second);
        assert_eq!(core.status().pending_requests, 2);
        assert_eq!(core.registry().host_pending().unwrap().count_for(client), 2);
    }

    #[test]
    fn host_replies_with_type_or_action_reach_the_client() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        for body in [r#""type":"listing","files":[]"#, r#""action":"getFiles","files":[]"#] {
            let id = request(&mut core, client, r#"{"action":"getFiles"}"#);
            let reply = format!(r#"{{"requestId":"{id}",{body}}}"#);
            assert_eq!(
                host_says(&mut core, &reply),
                vec![OutboundAction::Send(client, reply.clone())]
            );
        }
        assert_eq!(core.status().pending_requests, 0);
    }

    #[test]
    fn client_request_with_type_key_is_forwarded() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"getFiles","type":"x"}"#);
        assert_eq!(core.status().pending_requests, 1);
        assert!(!id.is_empty());
    }

    #[test]
    fn download_header_does_not_end_the_transfer() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"downloadFile","path":"a"}"#);
        let header = format!(r#"{{"requestId":"{id}","size":3}}"#);
        let chunk = encode_chunk_frame(&id, b"abc");
        let end = crate::wire::encode_end_frame(&id);

        let mut transfer = TransferState::new(id.clone());
        let mut received = None;
        for text in [&header, &chunk, &end] {
            let actions = host_says(&mut core, text);
            assert_eq!(actions, vec![OutboundAction::Send(client, text.clone())]);
            let frame = Frame::decode_from(text, Role::Host).unwrap();
            if let ChunkReceiveResult::Complete(bytes) = transfer.on_frame(&frame) {
                received = Some(bytes);
            } else {
                assert_eq!(core.status().pending_requests, 1);
            }
        }
        assert_eq!(received.unwrap(), b"abc");
        assert_eq!(core.status().pending_requests, 0);
    }

    #[test]
    fn error_frame_terminates_request() {
        let mut core = core_with_host();
        let client = add_client(&mut core, 2);
        let id = request(&mut core, client, r#"{"action":"downloadFile","path":"missing"}"#);
        let err = encode_error_frame(&ErrorBody::new("File not found").for_request(id.clone()));
        assert_eq!(
            host_says(&mut core, &err),
            vec![OutboundAction::Send(client, err.clone())]
        );
        assert_eq!(core.status().pending_requests, 0);
    }
}
