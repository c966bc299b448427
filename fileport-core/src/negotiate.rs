//! Role negotiation: a connection becomes host or client on its first valid
//! control message. Before that, everything it sends is inert.

use crate::protocol::ControlMessage;
use crate::registry::{ConnId, ConnectionRegistry, Role};

/// Outcome of applying a control message to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    RegisteredHost,
    RegisteredClient,
    /// A host is already registered; the connection stays Unregistered.
    HostSlotTaken { current: ConnId },
    /// The connection already has a role; the message is ignored.
    AlreadyRegistered(Role),
    UnknownConnection,
}

pub fn negotiate(
    registry: &mut ConnectionRegistry,
    conn: ConnId,
    control: ControlMessage,
) -> Negotiation {
    match registry.role(conn) {
        None => return Negotiation::UnknownConnection,
        Some(Role::Unregistered) => {}
        Some(role) => return Negotiation::AlreadyRegistered(role),
    }
    match control {
        ControlMessage::Host => match registry.current_host() {
            Some(current) => Negotiation::HostSlotTaken { current },
            None if registry.register_host(conn) => Negotiation::RegisteredHost,
            None => Negotiation::UnknownConnection,
        },
        ControlMessage::Client => {
            if registry.register_client(conn) {
                Negotiation::RegisteredClient
            } else {
                Negotiation::UnknownConnection
            }
        }
    }
}
