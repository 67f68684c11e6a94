use thiserror::Error;

/// Errors raised while validating configuration or resolving a call locally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// No service with this name was configured.
    #[error("service '{0}' is not configured")]
    UnknownService(String),

    /// The method name is not present in the service's method table.
    #[error("method {method} not available in {service} service")]
    UnknownMethod { service: String, method: String },

    /// A method table key that is not a string-encoded integer.
    #[error("invalid wire code '{code}' in {service} service")]
    InvalidWireCode { service: String, code: String },

    /// The configured remote could not be parsed as a URL.
    #[error("invalid remote '{remote}' for {service} service: {reason}")]
    InvalidRemote {
        service: String,
        remote: String,
        reason: String,
    },

    /// The parameter record did not serialize to a JSON object.
    #[error("parameters for {method} must be a record, got {kind}")]
    InvalidParams { method: String, kind: &'static str },

    /// The configuration document could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Errors from the underlying duplex channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Opening the channel failed.
    #[error("connection to {remote} failed: {reason}")]
    Connect { remote: String, reason: String },

    /// The remote address is not usable by this connector.
    #[error("invalid remote '{0}'")]
    InvalidRemote(String),

    /// The channel is gone; nothing can be sent on it.
    #[error("transport closed")]
    Closed,
}

/// Errors that can occur while establishing a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The handshake needs credentials carried as connection metadata.
    #[error("WebSocket protocols required for authentication")]
    MissingCredentials,

    /// A session for this service is already open.
    #[error("session already active for service '{0}'")]
    SessionAlreadyActive(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered the handshake with an error.
    #[error("{0}")]
    HandshakeRejected(String),

    /// The channel reported an error before the handshake completed.
    #[error("WebSocket connection failed")]
    Failed,

    /// The channel closed uncleanly before the handshake completed.
    #[error("WebSocket closed unexpectedly (code {code})")]
    ClosedUnexpectedly { code: u16 },

    /// The channel closed cleanly before the handshake completed.
    #[error("WebSocket closed during handshake (code {code})")]
    Closed { code: u16 },
}

/// Errors that complete a call future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The service has no live transport.
    #[error("No active session for service {0}")]
    NoActiveSession(String),

    /// Writing the request to the channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server replied with an error; carries `"<method>: <message>"`.
    #[error("{0}")]
    Remote(String),

    /// No reply arrived within the configured budget.
    #[error("{method} took too long, aborting")]
    Timeout { method: String },

    /// The session was closed while the call was outstanding.
    #[error("{method}: session for service {service} closed")]
    Disconnected { service: String, method: String },

    /// The request could not be encoded as a text frame.
    #[error("failed to encode {method} request: {reason}")]
    Encode { method: String, reason: String },

    /// The identifier is still held by an outstanding call.
    #[error("sequence {0} is already outstanding")]
    SequenceInUse(u64),

    /// The adapter dropped the call without completing it.
    #[error("{0}: call abandoned")]
    Abandoned(String),
}

/// Errors raised while classifying an inbound message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// An error reply that cannot be matched to exactly one outstanding call.
    #[error("Unknown request failed: {message}")]
    Unattributable { seq: Option<u64>, message: String },
}
