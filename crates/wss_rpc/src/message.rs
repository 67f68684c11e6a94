//! Wire message shapes and the pure classification of inbound messages.

use serde::Serialize;
use serde_json::Value;

use crate::catalog::{ErrorCatalog, code_number};

/// Method code the server uses to mark a completed exchange.
pub const DONE_METHOD: i64 = 0;

pub const TYPE_IMMEDIATE: &str = "Immediate";
pub const TYPE_ERROR: &str = "Error";
pub const TYPE_STREAM: &str = "Stream";

/// Separates the scheme from the id in an event's resource name.
pub const RESOURCE_SEPARATOR: char = '@';

/// Outbound call frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub method: i64,
    pub seq: u64,
    pub params: Vec<Value>,
}

impl Request {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A server-signaled failure, not yet resolved to text.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub seq: Option<u64>,
    pub method: Option<i64>,
    pub code: Value,
    /// Failure text embedded in the payload; wins over the catalog.
    pub embedded: Option<String>,
}

impl Failure {
    /// Human readable text for this failure.
    pub fn message(&self, catalog: &ErrorCatalog) -> String {
        if let Some(text) = &self.embedded {
            return text.clone();
        }
        if truthy(&self.code) {
            return catalog.describe(&self.code);
        }
        "unknown error".to_string()
    }
}

/// What an inbound steady-state message is.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Successful completion of the call carrying `seq`.
    Reply { seq: Option<u64>, payload: Value },
    /// Failed completion of some call.
    Failure(Failure),
    /// Unsolicited event for a resource scheme.
    Event { scheme: String, message: Value },
    /// Anything else.
    Other(Value),
}

/// Classify a steady-state message.
pub fn classify(message: Value) -> Inbound {
    let kind = message.get("type").and_then(Value::as_str);
    let method = message.get("method").and_then(Value::as_i64);

    let correlated =
        kind == Some(TYPE_IMMEDIATE) || method == Some(DONE_METHOD) || signals_failure(&message);

    if correlated {
        if let Some(failure) = failure_of(&message) {
            return Inbound::Failure(failure);
        }
        let seq = message.get("seq").and_then(seq_number);
        let payload = message.get("params").cloned().unwrap_or(Value::Null);
        return Inbound::Reply { seq, payload };
    }

    if let Some(resource) = message.get("resource").and_then(Value::as_str) {
        let scheme = resource
            .split_once(RESOURCE_SEPARATOR)
            .map_or(resource, |(scheme, _)| scheme)
            .to_string();
        return Inbound::Event { scheme, message };
    }

    Inbound::Other(message)
}

/// The failure `message` reports, if it reports one.
///
/// The code is the top-level `code`, or a numeric `params.error` when the
/// top-level one is absent.
fn failure_of(message: &Value) -> Option<Failure> {
    if !signals_failure(message) {
        return None;
    }
    let params = message.get("params");
    let code = message
        .get("code")
        .filter(|code| truthy(code))
        .or_else(|| {
            params
                .and_then(|p| p.get("error"))
                .filter(|error| error.is_number())
        })
        .cloned()
        .unwrap_or(Value::Null);

    Some(Failure {
        seq: message.get("seq").and_then(seq_number),
        method: message.get("method").and_then(Value::as_i64),
        code,
        embedded: params.and_then(embedded_text),
    })
}

fn signals_failure(message: &Value) -> bool {
    let params = message.get("params");
    message.get("type").and_then(Value::as_str) == Some(TYPE_ERROR)
        || message.get("code").is_some_and(truthy)
        || params.and_then(|p| p.get("success")) == Some(&Value::Bool(false))
        || params.and_then(|p| p.get("error")).is_some_and(truthy)
}

/// Outcome of the first message on a new channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    /// Explicit acknowledgement carrying an access token.
    Accepted(Value),
    /// The server refused; carries resolved text.
    Rejected(String),
    /// Some other first message; treated as success.
    Implicit(Value),
}

/// Classify the first message received after opening a channel.
pub fn classify_handshake(message: &Value, ack_method: i64, catalog: &ErrorCatalog) -> Handshake {
    let kind = message.get("type").and_then(Value::as_str);
    let params = message.get("params");

    let has_token = params
        .and_then(|p| p.get("accessToken"))
        .is_some_and(truthy);
    if kind == Some(TYPE_IMMEDIATE)
        && message.get("method").and_then(Value::as_i64) == Some(ack_method)
        && has_token
    {
        return Handshake::Accepted(params.cloned().unwrap_or(Value::Null));
    }

    if let Some(failure) = failure_of(message) {
        return Handshake::Rejected(failure.message(catalog));
    }

    Handshake::Implicit(params.cloned().unwrap_or(Value::Null))
}

/// Loose truthiness as used by the wire protocol's flags.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn seq_number(value: &Value) -> Option<u64> {
    code_number(value).and_then(|n| u64::try_from(n).ok())
}

/// `params.reason`, then `params.error`, then a bare string payload.
///
/// Only strings count; a numeric `params.error` is a catalog code.
fn embedded_text(params: &Value) -> Option<String> {
    if let Value::String(s) = params {
        return (!s.is_empty()).then(|| s.clone());
    }
    ["reason", "error"]
        .iter()
        .filter_map(|key| params.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}
