//! The duplex message channel the engine runs on.
//!
//! A [`Connector`] opens a channel to a remote and hands back a
//! [`TransportChannel`]: a sender for outbound frames and a receiver of
//! inbound events. Implementations own whatever tasks they need to pump the
//! underlying connection.

mod mem;
mod websocket;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use mem::{MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

/// Close code used when the connection dropped without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for a normal, client-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Describes how a channel closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Commands written to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One text frame.
    Text(String),
    /// Start a clean close.
    Close,
}

/// Events read from the channel.
///
/// A channel reports exactly one `Closed` event, after which it yields
/// nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed(CloseEvent),
}

/// The two halves of an open channel.
#[derive(Debug)]
pub struct TransportChannel {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens channels to remotes.
///
/// `protocols` carries the credential payload as connection-level metadata.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        remote: &str,
        protocols: &[String],
    ) -> BoxFuture<'static, Result<TransportChannel, TransportError>>;
}
