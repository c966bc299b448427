//! Connection registry: the single host slot and the set of clients.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::pending::PendingRequestTable;

/// Opaque handle for one transport connection. Allocated by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Role of a connection. Leaves `Unregistered` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unregistered,
    Host,
    Client,
}

/// Per-connection state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub role: Role,
    pub opened_tick: u64,
}

/// The host connection and the requests it still owes answers for.
#[derive(Debug)]
struct HostSlot {
    conn: ConnId,
    pending: PendingRequestTable,
}

/// What `remove_connection` took down.
#[derive(Debug)]
pub struct Removed {
    pub role: Role,
    /// The host's table, when the host was removed.
    pub orphaned: Option<PendingRequestTable>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnId, ConnectionState>,
    host: Option<HostSlot>,
    clients: HashSet<ConnId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection as Unregistered.
    pub fn open(&mut self, conn: ConnId, tick: u64) {
        self.connections.entry(conn).or_insert(ConnectionState {
            role: Role::Unregistered,
            opened_tick: tick,
        });
    }

    /// Claim the host slot. Fails if another host holds it or `conn` is
    /// unknown or already registered; the connection then stays Unregistered.
    pub fn register_host(&mut self, conn: ConnId) -> bool {
        if self.host.is_some() {
            return false;
        }
        match self.connections.get_mut(&conn) {
            Some(state) if state.role == Role::Unregistered => {
                state.role = Role::Host;
                self.host = Some(HostSlot {
                    conn,
                    pending: PendingRequestTable::new(),
                });
                true
            }
            _ => false,
        }
    }

    /// Add `conn` to the client set. Fails only for unknown or already
    /// registered connections.
    pub fn register_client(&mut self, conn: ConnId) -> bool {
        match self.connections.get_mut(&conn) {
            Some(state) if state.role == Role::Unregistered => {
                state.role = Role::Client;
                self.clients.insert(conn);
                true
            }
            _ => false,
        }
    }

    pub fn current_host(&self) -> Option<ConnId> {
        self.host.as_ref().map(|h| h.conn)
    }

    /// The host's pending table, if a host is registered.
    pub fn host_pending(&self) -> Option<&PendingRequestTable> {
        self.host.as_ref().map(|h| &h.pending)
    }

    pub fn host_pending_mut(&mut self) -> Option<&mut PendingRequestTable> {
        self.host.as_mut().map(|h| &mut h.pending)
    }

    pub fn role(&self, conn: ConnId) -> Option<Role> {
        self.connections.get(&conn).map(|s| s.role)
    }

    pub fn state(&self, conn: ConnId) -> Option<&ConnectionState> {
        self.connections.get(&conn)
    }

    /// True while `conn` is connected and registered as a client.
    pub fn is_open_client(&self, conn: ConnId) -> bool {
        self.clients.contains(&conn)
    }

    /// Forget a connection. Clears the host slot (handing back its pending
    /// table) or drops it from the client set.
    pub fn remove_connection(&mut self, conn: ConnId) -> Option<Removed> {
        let state = self.connections.remove(&conn)?;
        let orphaned = match state.role {
            Role::Host if self.current_host() == Some(conn) => {
                self.host.take().map(|slot| slot.pending)
            }
            Role::Client => {
                self.clients.remove(&conn);
                None
            }
            _ => None,
        };
        Some(Removed {
            role: state.role,
            orphaned,
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn pending_count(&self) -> usize {
        self.host_pending().map_or(0, PendingRequestTable::len)
    }
}
