use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

use crate::catalog::ErrorCatalog;
use crate::config::{AttributionMode, ErrorCallback};
use crate::error::{CallError, DispatchError};
use crate::message::{Failure, Inbound, TYPE_STREAM, classify};
use crate::pending::PendingTable;
use crate::registry::Registry;
use crate::sequence::Sequencer;

/// What the dispatcher did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The call with this identifier was resolved.
    Resolved(u64),
    /// The call with this identifier was rejected.
    Rejected(u64),
    /// A reply for a call that is no longer outstanding.
    Late(u64),
    /// An unsolicited event; `delivered` is false when no handler matched.
    Event { scheme: String, delivered: bool },
    /// Logged and dropped.
    Dropped,
}

/// Steady-state classifier shared by every session of an adapter.
///
/// Holds a lock for the whole of each dispatch, so exactly one inbound
/// message is handled at a time across all services.
pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    catalog: ErrorCatalog,
    pending: Arc<PendingTable>,
    sequencer: Arc<Sequencer>,
    attribution: AttributionMode,
    on_error: Option<ErrorCallback>,
    serial: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        catalog: ErrorCatalog,
        pending: Arc<PendingTable>,
        sequencer: Arc<Sequencer>,
        attribution: AttributionMode,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Self {
            registry,
            catalog,
            pending,
            sequencer,
            attribution,
            on_error,
            serial: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &ErrorCatalog {
        &self.catalog
    }

    /// Take the process-wide message lock.
    pub fn serialize(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a failure on the side channel.
    pub fn notify(&self, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(message);
        }
    }

    /// Classify one text frame received by `service` and route it.
    pub fn dispatch(&self, service: &str, text: &str) -> Result<Dispatched, DispatchError> {
        let _serial = self.serialize();

        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(service, error = %e, "Dropping malformed message");
                return Ok(Dispatched::Dropped);
            }
        };

        match classify(message) {
            Inbound::Reply {
                seq: Some(seq),
                payload,
            } => {
                if self.pending.is_owned_by(seq, service) && self.pending.resolve(seq, payload) {
                    debug!(service, seq, "Call resolved");
                    Ok(Dispatched::Resolved(seq))
                } else {
                    debug!(service, seq, "Reply for a call that is no longer pending");
                    Ok(Dispatched::Late(seq))
                }
            }
            Inbound::Reply { seq: None, .. } => {
                warn!(service, "Dropping reply without a sequence number");
                Ok(Dispatched::Dropped)
            }
            Inbound::Failure(failure) => self.fail(service, failure),
            Inbound::Event { scheme, message } => {
                let delivered = self
                    .registry
                    .get(service)
                    .is_some_and(|entry| entry.router.route(&scheme, &message));
                Ok(Dispatched::Event { scheme, delivered })
            }
            Inbound::Other(message) => {
                if message.get("type").and_then(Value::as_str) == Some(TYPE_STREAM) {
                    debug!(service, %message, "Stream response");
                } else {
                    debug!(service, %message, "Dropping unclassified message");
                }
                Ok(Dispatched::Dropped)
            }
        }
    }

    /// Error path: resolve the text, notify, and reject exactly one call.
    fn fail(&self, service: &str, failure: Failure) -> Result<Dispatched, DispatchError> {
        let text = failure.message(&self.catalog);
        let notice = match failure
            .method
            .and_then(|code| self.registry.method_name(service, code))
        {
            Some(method) => format!("{method}: {text}"),
            None => text.clone(),
        };
        self.notify(&notice);

        let carried = failure
            .seq
            .filter(|seq| self.pending.is_owned_by(*seq, service));
        let target = match (carried, self.attribution) {
            (Some(seq), _) => Some(seq),
            (None, AttributionMode::SoleOutstanding) => self.pending.sole_outstanding(service),
            (None, AttributionMode::Sequence) => None,
        };

        let completed = target.and_then(|seq| {
            self.pending
                .complete(seq, |info| {
                    Err(CallError::Remote(format!("{}: {}", info.method, text)))
                })
        });

        let Some(info) = completed else {
            error!(
                service,
                seq = ?failure.seq,
                message = %text,
                "Error reply cannot be attributed to an outstanding call"
            );
            return Err(DispatchError::Unattributable {
                seq: failure.seq,
                message: text,
            });
        };

        warn!(service, seq = info.seq, method = %info.method, message = %text, "Call failed");
        if self.catalog.is_uncounted(&failure.code) && self.sequencer.compensate(info.seq) {
            debug!(service, seq = info.seq, "Sequence given back after uncounted error");
        }
        Ok(Dispatched::Rejected(info.seq))
    }
}
