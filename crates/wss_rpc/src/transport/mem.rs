use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{CloseEvent, Connector, NORMAL_CLOSURE, Outbound, TransportChannel, TransportEvent};
use crate::error::TransportError;

/// In-process connector; every opened channel surfaces as a [`MemoryPeer`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Mutex<VecDeque<TransportError>>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of the peers it opens.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accepted, peers) = mpsc::unbounded_channel();
        let inner = Arc::new(MemInner {
            accepted,
            refusals: Mutex::new(VecDeque::new()),
        });
        (Self { inner }, peers)
    }

    /// Make the next `open` fail with `error`.
    pub fn refuse_next(&self, error: TransportError) {
        if let Ok(mut refusals) = self.inner.refusals.lock() {
            refusals.push_back(error);
        }
    }
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        remote: &str,
        protocols: &[String],
    ) -> BoxFuture<'static, Result<TransportChannel, TransportError>> {
        let refused = self
            .inner
            .refusals
            .lock()
            .ok()
            .and_then(|mut refusals| refusals.pop_front());
        if let Some(error) = refused {
            return futures::future::ready(Err(error)).boxed();
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            remote: remote.to_string(),
            protocols: protocols.to_vec(),
            received: out_rx,
            events: in_tx,
        };

        let result = self
            .inner
            .accepted
            .send(peer)
            .map(|_| TransportChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
            .map_err(|_| TransportError::Connect {
                remote: remote.to_string(),
                reason: "no memory peer listening".to_string(),
            });
        futures::future::ready(result).boxed()
    }
}

/// The server side of an in-process channel.
#[derive(Debug)]
pub struct MemoryPeer {
    pub remote: String,
    pub protocols: Vec<String>,
    received: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Push a JSON message to the client.
    pub fn send_json(&self, message: Value) {
        let _ = self
            .events
            .send(TransportEvent::Message(message.to_string()));
    }

    /// Push a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Report a transport-level error to the client.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(reason.into()));
    }

    /// Close the channel from the server side.
    pub fn close(&self, event: CloseEvent) {
        let _ = self.events.send(TransportEvent::Closed(event));
    }

    /// Next frame written by the client; `None` once the client is gone.
    ///
    /// A client-initiated close is answered with a clean close event.
    pub async fn recv(&mut self) -> Option<Outbound> {
        let frame = self.received.recv().await?;
        if frame == Outbound::Close {
            self.close(CloseEvent::clean(NORMAL_CLOSURE, ""));
        }
        Some(frame)
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.recv().await? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Close => None,
        }
    }
}
