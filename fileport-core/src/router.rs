//! Request router: stamps client requests with an id, forwards them to the
//! host, and sends each host frame back to the client that asked.

use crate::core::{MessageError, OutboundAction};
use crate::pending::PendingRequest;
use crate::protocol::{is_valid_request_id, ErrorBody};
use crate::registry::{ConnId, ConnectionRegistry, Role};
use crate::wire::{encode_error_frame, Frame, RequestFrame};

/// Fresh request id for clients that did not pick one.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone)]
pub struct RequestRouter {
    max_pending: usize,
}

impl RequestRouter {
    pub fn new(max_pending: usize) -> Self {
        Self { max_pending }
    }

    /// Client -> host. With no host registered the request is dropped and the
    /// client hears nothing. Id problems are answered with an error frame.
    pub fn route_client_request(
        &self,
        registry: &mut ConnectionRegistry,
        client: ConnId,
        request: &RequestFrame,
        tick: u64,
    ) -> Result<Vec<OutboundAction>, MessageError> {
        let host = registry.current_host().ok_or(MessageError::NoHost)?;
        let request_id = match request.message.id() {
            Some(id) if !is_valid_request_id(id) => {
                return Ok(vec![reject(client, id, "invalid request id")]);
            }
            Some(id) => id.to_string(),
            None => new_request_id(),
        };
        let pending = registry.host_pending_mut().ok_or(MessageError::NoHost)?;
        if pending.contains(&request_id) {
            return Ok(vec![reject(client, &request_id, "duplicate request id")]);
        }
        if pending.len() >= self.max_pending {
            return Ok(vec![reject(
                client,
                &request_id,
                "too many pending requests",
            )]);
        }
        let forwarded = request.stamped(&request_id);
        pending.insert(
            request_id,
            PendingRequest {
                client,
                action: request.message.action.name(),
                issued_tick: tick,
            },
        );
        Ok(vec![OutboundAction::Send(host, forwarded)])
    }

    /// Host -> client. `raw` is forwarded verbatim. A frame that completes the
    /// request (see [`Frame::completes`]) retires the pending entry.
    pub fn route_host_frame(
        &self,
        registry: &mut ConnectionRegistry,
        frame: &Frame,
        raw: &str,
    ) -> Result<Vec<OutboundAction>, MessageError> {
        if matches!(frame, Frame::Control(_) | Frame::Request(_)) {
            return Err(MessageError::Unexpected {
                role: Role::Host,
                kind: frame.kind(),
            });
        }
        let request_id = frame.request_id().ok_or(MessageError::Uncorrelated)?;
        let pending = registry.host_pending_mut().ok_or(MessageError::NoHost)?;
        let entry = pending
            .get(request_id)
            .ok_or_else(|| MessageError::UnknownRequest(request_id.to_string()))?;
        let client = entry.client;
        if frame.completes(entry.action) {
            pending.remove(request_id);
        }
        if !registry.is_open_client(client) {
            return Err(MessageError::ClientGone(request_id.to_string()));
        }
        Ok(vec![OutboundAction::Send(client, raw.to_string())])
    }
}

fn reject(client: ConnId, request_id: &str, reason: &str) -> OutboundAction {
    OutboundAction::Send(
        client,
        encode_error_frame(&ErrorBody::new(reason).for_request(request_id)),
    )
}
