//! Outstanding hub requests keyed by correlation id

use parking_lot::Mutex;
use std::collections::HashMap;

/// What a correlation id was issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Initial `get_states`
    Snapshot,
    /// `get_states` re-issued after a reconnect
    Resync,
    Subscribe,
    Unsubscribe,
    CallService { domain: String, service: String },
}

impl RequestKind {
    fn is_service_call(&self) -> bool {
        matches!(self, RequestKind::CallService { .. })
    }
}

/// Correlation id → request kind, removed on acknowledgement
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u64, RequestKind>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u64, kind: RequestKind) {
        self.inner.lock().insert(id, kind);
    }

    /// Remove and return the request an acknowledgement answers
    pub fn take(&self, id: u64) -> Option<RequestKind> {
        self.inner.lock().remove(&id)
    }

    /// Drop the snapshot and subscription bookkeeping of a lost connection.
    ///
    /// Service calls stay: the ones queued during the outage are written on
    /// the new connection and still get their acknowledgement.
    pub fn discard_stream_requests(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, kind| kind.is_service_call());
        before - inner.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u64) -> bool {
        self.inner.lock().contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
