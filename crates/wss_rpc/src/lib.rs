//! Multiplexed request/response calls over a single duplex text channel.
//!
//! Every call gets a correlation identifier (`seq`), is written as
//! `{method, seq, params}`, and is completed exactly once: by the matching
//! reply, by an attributed error, by its timeout, or by its session closing.
//! Server-pushed events are routed to handlers by resource scheme.
//!
//! # Example
//!
//! ```ignore
//! use wss_rpc::{AdapterConfig, WssAdapter};
//!
//! let config = AdapterConfig::from_json(&std::fs::read_to_string("adapter.json")?)?
//!     .with_on_error(|message| eprintln!("{message}"));
//! let adapter = WssAdapter::websocket(config)?;
//!
//! let app = adapter.service("app")?;
//! let token = app.connect(["access-token"], None).await?;
//! let reply = app.call("ping", serde_json::json!({})).await?;
//! app.disconnect();
//! ```

mod adapter;
mod catalog;
mod config;
mod connection;
mod dispatch;
mod error;
mod message;
mod pending;
mod registry;
mod router;
mod sequence;
mod service;
mod session;
pub mod transport;

pub use adapter::WssAdapter;
pub use catalog::{ErrorCatalog, ErrorCode};
pub use config::{
    AdapterConfig, AttributionMode, DEFAULT_HANDSHAKE_METHOD, DEFAULT_TIMEOUT_MS,
    DisconnectCallback, ErrorCallback, MethodInfo, MethodSpec, ServiceConfig,
    SubscriptionHandler,
};
pub use dispatch::Dispatched;
pub use error::{CallError, ConfigError, ConnectError, DispatchError, TransportError};
pub use message::{Handshake, Inbound, Request, classify, classify_handshake};
pub use pending::{PendingCall, PendingInfo, PendingTable};
pub use router::SubscriptionRouter;
pub use sequence::Sequencer;
pub use service::{Method, ServiceHandle};
pub use session::SessionState;
