//! Pending request table: request id -> the client waiting on it.

use std::collections::HashMap;

use crate::registry::ConnId;

/// One request forwarded to the host and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub client: ConnId,
    pub action: &'static str,
    /// Tick when the request was forwarded (for timeout).
    pub issued_tick: u64,
}

/// Owned by the host slot; dropped with it when the host goes away.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Returns false (and leaves the table untouched) if the
    /// id is already pending.
    pub fn insert(&mut self, request_id: String, request: PendingRequest) -> bool {
        if self.entries.contains_key(&request_id) {
            return false;
        }
        self.entries.insert(request_id, request);
        true
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.entries.get(request_id)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.entries.remove(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of requests a client is waiting on.
    pub fn count_for(&self, client: ConnId) -> usize {
        self.entries.values().filter(|p| p.client == client).count()
    }

    /// Remove and return every entry issued more than `timeout_ticks` before `now`.
    pub fn take_expired(&mut self, now: u64, timeout_ticks: u64) -> Vec<(String, PendingRequest)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.issued_tick) > timeout_ticks)
            .map(|(id, _)| id.clone())
            .collect();
        let mut out: Vec<(String, PendingRequest)> = expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|p| (id, p)))
            .collect();
        out.sort_by_key(|(_, p)| p.issued_tick);
        out
    }

    /// Empty the table, yielding every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (String, PendingRequest)> + '_ {
        self.entries.drain()
    }
}
