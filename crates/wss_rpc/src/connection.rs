use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::adapter::Shared;
use crate::error::{CallError, ConnectError};
use crate::message::{Handshake, classify_handshake};
use crate::registry::ServiceEntry;
use crate::session::SessionGuard;
use crate::transport::{CloseEvent, Outbound, TransportEvent};

/// Which handler the session's reader currently runs.
enum Stage {
    /// Waiting for the first message; the connect call is still in flight.
    Handshake(oneshot::Sender<Result<Value, ConnectError>>),
    /// Every message goes through the dispatcher.
    Established,
    /// The handshake failed; the channel is being closed.
    Rejected,
}

/// Open a session for `entry` and run its handshake.
///
/// Resolves with the handshake payload once the first message arrives.
pub(crate) async fn connect(
    shared: Arc<Shared>,
    entry: Arc<ServiceEntry>,
    credentials: Vec<String>,
    remote: Option<String>,
) -> Result<Value, ConnectError> {
    if credentials.is_empty() {
        return Err(ConnectError::MissingCredentials);
    }

    let guard = shared.sessions.try_create(&entry.name)?;
    let remote = remote.unwrap_or_else(|| entry.remote.clone());
    info!(
        service = %entry.name,
        connection_id = %guard.id(),
        remote = %remote,
        "Connecting"
    );

    let channel = match shared.connector.open(&remote, &credentials).await {
        Ok(channel) => channel,
        Err(e) => {
            error!(service = %entry.name, error = %e, "Transport failed to open");
            return Err(e.into());
        }
    };

    if !shared.sessions.attach(&guard, channel.outbound.clone()) {
        // Disconnected while the transport was opening.
        let _ = channel.outbound.send(Outbound::Close);
        return Err(ConnectError::Closed {
            code: crate::transport::NORMAL_CLOSURE,
        });
    }

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(drive(
        shared,
        entry,
        guard,
        channel.outbound,
        channel.inbound,
        ready_tx,
    ));

    ready_rx.await.unwrap_or(Err(ConnectError::Failed))
}

/// Close `service`'s session, rejecting its outstanding calls.
///
/// No-op when the service has no session.
pub(crate) fn disconnect(shared: &Shared, service: &str) {
    let Some(outbound) = shared.sessions.take(service) else {
        debug!(service, "Disconnect without an active session");
        return;
    };

    if let Some(outbound) = outbound {
        let _ = outbound.send(Outbound::Close);
    }
    let rejected = reject_outstanding(shared, service);
    info!(service, rejected, "Disconnected");
}

fn reject_outstanding(shared: &Shared, service: &str) -> usize {
    shared.pending.reject_service(service, |info| CallError::Disconnected {
        service: info.service.clone(),
        method: info.method.clone(),
    })
}

/// Reader loop for one session: handshake first, then steady state.
async fn drive(
    shared: Arc<Shared>,
    entry: Arc<ServiceEntry>,
    guard: SessionGuard,
    outbound: mpsc::UnboundedSender<Outbound>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ready: oneshot::Sender<Result<Value, ConnectError>>,
) {
    let service = entry.name.as_str();
    let connection_id = guard.id();
    let mut stage = Stage::Handshake(ready);

    let close = loop {
        let Some(event) = inbound.recv().await else {
            break CloseEvent::abnormal("transport dropped");
        };

        match event {
            TransportEvent::Message(text) => {
                stage = match stage {
                    Stage::Handshake(ready) => {
                        handshake(&shared, &guard, &outbound, ready, &text)
                    }
                    Stage::Established => {
                        if let Err(e) = shared.dispatcher.dispatch(service, &text) {
                            error!(service, %connection_id, error = %e, "Failed to dispatch message");
                        }
                        Stage::Established
                    }
                    Stage::Rejected => {
                        debug!(service, %connection_id, "Ignoring message after rejected handshake");
                        Stage::Rejected
                    }
                };
            }

            TransportEvent::Error(reason) => {
                error!(service, %connection_id, error = %reason, "Transport error");
                if let Stage::Handshake(ready) = stage {
                    guard.release();
                    let _ = outbound.send(Outbound::Close);
                    let _ = ready.send(Err(ConnectError::Failed));
                    stage = Stage::Rejected;
                }
            }

            TransportEvent::Closed(event) => {
                if let Stage::Handshake(ready) = stage {
                    let err = if event.was_clean {
                        ConnectError::Closed { code: event.code }
                    } else {
                        ConnectError::ClosedUnexpectedly { code: event.code }
                    };
                    let _ = ready.send(Err(err));
                }
                break event;
            }
        }
    };

    if guard.release() {
        let rejected = reject_outstanding(&shared, service);
        if rejected > 0 {
            warn!(service, %connection_id, rejected, "Rejected calls on closed session");
        }
    }

    info!(
        service,
        %connection_id,
        code = close.code,
        reason = %close.reason,
        clean = close.was_clean,
        "Session closed"
    );
    if let Some(callback) = &entry.on_disconnect {
        callback(&close);
    }
}

/// Handle the first message on a session.
fn handshake(
    shared: &Shared,
    guard: &SessionGuard,
    outbound: &mpsc::UnboundedSender<Outbound>,
    ready: oneshot::Sender<Result<Value, ConnectError>>,
    text: &str,
) -> Stage {
    let service = guard.service();
    let _serial = shared.dispatcher.serialize();

    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(service, error = %e, "Malformed handshake message, still waiting");
            return Stage::Handshake(ready);
        }
    };

    match classify_handshake(
        &message,
        shared.handshake_method,
        shared.dispatcher.catalog(),
    ) {
        Handshake::Accepted(payload) | Handshake::Implicit(payload) => {
            if !shared.sessions.establish(guard) {
                let _ = ready.send(Err(ConnectError::Closed {
                    code: crate::transport::NORMAL_CLOSURE,
                }));
                return Stage::Rejected;
            }
            info!(service, connection_id = %guard.id(), "Session established");
            let _ = ready.send(Ok(payload));
            Stage::Established
        }
        Handshake::Rejected(text) => {
            warn!(service, message = %text, "Handshake rejected");
            shared.dispatcher.notify(&text);
            guard.release();
            let _ = outbound.send(Outbound::Close);
            let _ = ready.send(Err(ConnectError::HandshakeRejected(text)));
            Stage::Rejected
        }
    }
}
