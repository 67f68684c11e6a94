//! Per-service façade: connect, disconnect, and table-driven method calls.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::adapter::Shared;
use crate::config::MethodSpec;
use crate::connection;
use crate::error::{CallError, ConfigError, ConnectError, TransportError};
use crate::message::Request;
use crate::pending::PendingCall;
use crate::registry::ServiceEntry;
use crate::session::SessionState;
use crate::transport::Outbound;

/// Handle to one configured service.
#[derive(Clone)]
pub struct ServiceHandle {
    shared: Arc<Shared>,
    entry: Arc<ServiceEntry>,
}

impl ServiceHandle {
    pub(crate) fn new(shared: Arc<Shared>, entry: Arc<ServiceEntry>) -> Self {
        Self { shared, entry }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Open the transport and wait for the handshake.
    ///
    /// `credentials` are sent as connection metadata and must not be empty.
    /// `remote` overrides the configured address for this session only.
    pub async fn connect<I, S>(&self, credentials: I, remote: Option<&str>) -> Result<Value, ConnectError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        connection::connect(
            Arc::clone(&self.shared),
            Arc::clone(&self.entry),
            credentials.into_iter().map(Into::into).collect(),
            remote.map(str::to_string),
        )
        .await
    }

    /// Close the session and reject its outstanding calls. Idempotent.
    pub fn disconnect(&self) {
        connection::disconnect(&self.shared, &self.entry.name);
    }

    pub fn state(&self) -> SessionState {
        self.shared.sessions.state(&self.entry.name)
    }

    /// Names of the methods this service exposes, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entry.methods.names().collect();
        names.sort_unstable();
        names
    }

    /// Resolve a method by name.
    pub fn method(&self, name: &str) -> Result<Method, ConfigError> {
        let spec = self
            .entry
            .methods
            .by_name(name)
            .ok_or_else(|| ConfigError::UnknownMethod {
                service: self.entry.name.clone(),
                method: name.to_string(),
            })?;
        Ok(Method {
            service: self.clone(),
            spec: Arc::clone(spec),
        })
    }

    /// Call `method` with a parameter record and wait for its completion.
    pub async fn call<P>(&self, method: &str, params: P) -> Result<Value, CallError>
    where
        P: Serialize,
    {
        self.method(method)?.send(params)?.await
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.entry.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A callable method, resolved once from the service's table.
#[derive(Clone)]
pub struct Method {
    service: ServiceHandle,
    spec: Arc<MethodSpec>,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Wire code sent in the `method` field.
    pub fn code(&self) -> i64 {
        self.spec.code
    }

    /// Declared positional parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.spec.parameters
    }

    /// Send the request now and return its completion future.
    ///
    /// Must be called from within a tokio runtime; the call's timer is a task.
    pub fn send<P>(&self, params: P) -> Result<PendingCall, CallError>
    where
        P: Serialize,
    {
        let shared = &self.service.shared;
        let service = self.service.name();
        let record = self.record(params)?;

        let request = Request {
            method: self.spec.code,
            seq: shared.sequencer.next(),
            params: self.spec.project(&record),
        };
        let text = request.to_text().map_err(|e| CallError::Encode {
            method: self.spec.name.clone(),
            reason: e.to_string(),
        })?;

        let outbound = shared
            .sessions
            .sender(service)
            .ok_or_else(|| CallError::NoActiveSession(service.to_string()))?;

        let call = self.transmit(request.seq, text, &outbound)?;

        debug!(
            service,
            seq = request.seq,
            method = %self.spec.name,
            code = self.spec.code,
            "Call sent"
        );
        Ok(call)
    }

    /// Register `seq` and write the frame on `outbound`.
    ///
    /// A disconnect may land between looking up `outbound` and registering;
    /// the entry is then completed here since `reject_service` missed it.
    fn transmit(
        &self,
        seq: u64,
        text: String,
        outbound: &mpsc::UnboundedSender<Outbound>,
    ) -> Result<PendingCall, CallError> {
        let shared = &self.service.shared;
        let service = self.service.name();
        let call = shared
            .pending
            .register(seq, service, &self.spec.name, shared.timeout)?;

        let live = shared
            .sessions
            .sender(service)
            .is_some_and(|current| current.same_channel(outbound));
        if !live {
            let disconnected = || CallError::Disconnected {
                service: service.to_string(),
                method: self.spec.name.clone(),
            };
            shared.pending.complete(seq, |_| Err(disconnected()));
            return Err(disconnected());
        }

        if outbound.send(Outbound::Text(text)).is_err() {
            shared
                .pending
                .complete(seq, |_| Err(TransportError::Closed.into()));
            return Err(TransportError::Closed.into());
        }
        Ok(call)
    }

    /// Send the request and wait for its completion.
    pub async fn call<P>(&self, params: P) -> Result<Value, CallError>
    where
        P: Serialize,
    {
        self.send(params)?.await
    }

    fn record<P>(&self, params: P) -> Result<serde_json::Map<String, Value>, CallError>
    where
        P: Serialize,
    {
        let invalid = |kind| {
            CallError::from(ConfigError::InvalidParams {
                method: self.spec.name.clone(),
                kind,
            })
        };
        match serde_json::to_value(params).map_err(|_| invalid("unserializable value"))? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(serde_json::Map::new()),
            Value::Bool(_) => Err(invalid("boolean")),
            Value::Number(_) => Err(invalid("number")),
            Value::String(_) => Err(invalid("string")),
            Value::Array(_) => Err(invalid("array")),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("service", &self.service.name())
            .field("spec", &self.spec)
            .finish()
    }
}
