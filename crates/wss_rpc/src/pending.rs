use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::CallError;

/// What a pending call eventually completes with.
pub type Completion = Result<Value, CallError>;

/// Diagnostic view of an outstanding call, handed to completion closures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub seq: u64,
    pub service: String,
    pub method: String,
}

struct PendingEntry {
    info: PendingInfo,
    tx: oneshot::Sender<Completion>,
    timer: AbortHandle,
}

/// Outstanding calls keyed by correlation identifier.
///
/// Removing an entry from the map is what grants the right to complete it,
/// so every entry is completed exactly once no matter which path (reply,
/// error, timeout, disconnect) gets there first.
pub struct PendingTable {
    entries: DashMap<u64, PendingEntry, ahash::RandomState>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::default(),
        }
    }

    /// Register a call and arm its timeout.
    ///
    /// Must be called from within a tokio runtime. The timer is spawned while
    /// the slot is held, so it can never observe the table before the entry
    /// exists.
    pub fn register(
        self: &Arc<Self>,
        seq: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingCall, CallError> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(seq) {
            Entry::Occupied(_) => Err(CallError::SequenceInUse(seq)),
            Entry::Vacant(slot) => {
                let info = PendingInfo {
                    seq,
                    service: service.into(),
                    method: method.into(),
                };
                let (tx, rx) = oneshot::channel();

                let table = Arc::clone(self);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    table.expire(seq);
                })
                .abort_handle();

                let method = info.method.clone();
                slot.insert(PendingEntry { info, tx, timer });
                Ok(PendingCall { seq, method, rx })
            }
        }
    }

    /// Complete the call registered under `seq`, if it is still outstanding.
    ///
    /// Returns the call's info when an entry was completed.
    pub fn complete<F>(&self, seq: u64, outcome: F) -> Option<PendingInfo>
    where
        F: FnOnce(&PendingInfo) -> Completion,
    {
        let (_, entry) = self.entries.remove(&seq)?;
        entry.timer.abort();
        let result = outcome(&entry.info);
        if entry.tx.send(result).is_err() {
            debug!(seq, method = %entry.info.method, "Caller dropped before completion");
        }
        Some(entry.info)
    }

    pub fn resolve(&self, seq: u64, payload: Value) -> bool {
        self.complete(seq, |_| Ok(payload)).is_some()
    }

    /// Reject every outstanding call of `service`.
    pub fn reject_service<F>(&self, service: &str, error: F) -> usize
    where
        F: Fn(&PendingInfo) -> CallError,
    {
        let seqs: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| entry.info.service == service)
            .map(|entry| *entry.key())
            .collect();

        seqs.into_iter()
            .filter(|seq| self.complete(*seq, |info| Err(error(info))).is_some())
            .count()
    }

    /// The only outstanding call of `service`, if there is exactly one.
    pub fn sole_outstanding(&self, service: &str) -> Option<u64> {
        let mut matching = self
            .entries
            .iter()
            .filter(|entry| entry.info.service == service)
            .map(|entry| *entry.key());
        let first = matching.next()?;
        match matching.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// Whether `seq` is outstanding on behalf of `service`.
    pub fn is_owned_by(&self, seq: u64, service: &str) -> bool {
        self.entries
            .get(&seq)
            .is_some_and(|entry| entry.info.service == service)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timer path: the entry's own timer is the one running, so it is not aborted.
    fn expire(&self, seq: u64) {
        if let Some((_, entry)) = self.entries.remove(&seq) {
            warn!(
                seq,
                service = %entry.info.service,
                method = %entry.info.method,
                "Call timed out"
            );
            let _ = entry.tx.send(Err(CallError::Timeout {
                method: entry.info.method,
            }));
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut seqs: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        seqs.sort_unstable();
        f.debug_struct("PendingTable").field("seqs", &seqs).finish()
    }
}

/// Future returned by a call; completes exactly once.
#[derive(Debug)]
pub struct PendingCall {
    seq: u64,
    method: String,
    rx: oneshot::Receiver<Completion>,
}

impl PendingCall {
    /// Correlation identifier carried by the request.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for PendingCall {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::Abandoned(self.method.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
