use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use wss_rpc::transport::{
    CloseEvent, Connector, MemoryConnector, MemoryPeer, Outbound, TransportChannel,
};
use wss_rpc::{
    AdapterConfig, AttributionMode, CallError, ConfigError, ConnectError, ErrorCatalog,
    MethodInfo, ServiceConfig, ServiceHandle, SessionState, TransportError, WssAdapter,
};

const TOKEN: &str = "access-token";

struct Harness {
    adapter: WssAdapter,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    errors: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedReceiver<Value>,
    closes: mpsc::UnboundedReceiver<CloseEvent>,
}

fn harness() -> Harness {
    harness_with(|config| config)
}

fn harness_with(tweak: impl FnOnce(AdapterConfig) -> AdapterConfig) -> Harness {
    let (error_tx, errors) = mpsc::unbounded_channel();
    let (event_tx, events) = mpsc::unbounded_channel();
    let (close_tx, closes) = mpsc::unbounded_channel();

    let app = ServiceConfig::builder()
        .remote("mem://app")
        .build()
        .with_method("10001", MethodInfo::new("ping", Vec::<String>::new()))
        .with_method("10002", MethodInfo::new("order", ["symbol", "side", "qty"]))
        .with_subscription("orders", move |event| {
            let _ = event_tx.send(event.clone());
        })
        .with_on_disconnect(move |event| {
            let _ = close_tx.send(event.clone());
        });

    let config = AdapterConfig::builder()
        .timeout_ms(100)
        .errors(
            ErrorCatalog::new("en")
                .with_code(7, "insufficient funds")
                .with_uncounted(3),
        )
        .build()
        .with_service("app", app)
        .with_on_error(move |message| {
            let _ = error_tx.send(message.to_string());
        });

    let (connector, peers) = MemoryConnector::pair();
    let adapter = WssAdapter::configure(tweak(config), connector).unwrap();
    Harness {
        adapter,
        peers,
        errors,
        events,
        closes,
    }
}

/// Connect `app` and acknowledge the handshake.
async fn established(h: &mut Harness) -> (ServiceHandle, MemoryPeer) {
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let peer = h.peers.recv().await.unwrap();
    peer.send_json(json!({
        "type": "Immediate",
        "method": 20000,
        "params": { "accessToken": "tok-1" }
    }));

    let payload = connecting.await.unwrap().unwrap();
    assert_eq!(payload, json!({ "accessToken": "tok-1" }));
    (app, peer)
}

#[tokio::test]
async fn test_connect_carries_credentials() {
    let mut h = harness();
    let (app, peer) = established(&mut h).await;

    assert_eq!(peer.protocols, vec![TOKEN]);
    assert_eq!(peer.remote, "mem://app");
    assert_eq!(app.state(), SessionState::Established);
    assert!(h.adapter.is_connected("app"));
}

#[tokio::test]
async fn test_connect_requires_credentials() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();

    let err = app.connect(Vec::<String>::new(), None).await.unwrap_err();
    assert_eq!(err, ConnectError::MissingCredentials);
    assert!(h.peers.try_recv().is_err());
    assert_eq!(app.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_with_remote_override() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], Some("mem://staging")).await }
    });

    let peer = h.peers.recv().await.unwrap();
    assert_eq!(peer.remote, "mem://staging");
    peer.send_json(json!({ "type": "Immediate", "params": { "motd": "hi" } }));

    // No explicit acknowledgement: the first message counts as success.
    assert_eq!(connecting.await.unwrap().unwrap(), json!({ "motd": "hi" }));
    assert_eq!(app.state(), SessionState::Established);
}

#[tokio::test]
async fn test_duplicate_connect_rejected() {
    let mut h = harness();
    let (app, _peer) = established(&mut h).await;

    let err = app.connect([TOKEN], None).await.unwrap_err();
    assert_eq!(err, ConnectError::SessionAlreadyActive("app".into()));
}

#[tokio::test]
async fn test_handshake_rejected() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let mut peer = h.peers.recv().await.unwrap();
    peer.send_json(json!({ "type": "Error", "code": 7 }));

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(err, ConnectError::HandshakeRejected("insufficient funds".into()));
    assert_eq!(h.errors.recv().await.unwrap(), "insufficient funds");
    assert_eq!(app.state(), SessionState::Disconnected);

    // The client closes the rejected channel.
    assert_eq!(peer.recv().await, Some(Outbound::Close));
    assert!(h.closes.recv().await.unwrap().was_clean);
}

#[tokio::test]
async fn test_unclean_close_during_connect() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let peer = h.peers.recv().await.unwrap();
    peer.close(CloseEvent::abnormal("reset"));

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(err, ConnectError::ClosedUnexpectedly { code: 1006 });
    assert_eq!(
        err.to_string(),
        "WebSocket closed unexpectedly (code 1006)"
    );
    assert!(!h.closes.recv().await.unwrap().was_clean);
    assert_eq!(app.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_transport_error_during_connect() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let peer = h.peers.recv().await.unwrap();
    peer.fail("tls handshake failed");

    assert_eq!(connecting.await.unwrap().unwrap_err(), ConnectError::Failed);
    assert_eq!(app.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_transport_refused() {
    let (connector, _peers) = MemoryConnector::pair();
    connector.refuse_next(TransportError::Connect {
        remote: "mem://app".into(),
        reason: "connection refused".into(),
    });
    let config = AdapterConfig::builder().build().with_service(
        "app",
        ServiceConfig::builder().remote("mem://app").build(),
    );
    let adapter = WssAdapter::configure(config, connector).unwrap();
    let app = adapter.service("app").unwrap();

    let err = app.connect([TOKEN], None).await.unwrap_err();
    assert!(matches!(err, ConnectError::Transport(TransportError::Connect { .. })));
    assert_eq!(app.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_ping_resolves_with_reply_params() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;

    let call = app.method("ping").unwrap().send(json!({})).unwrap();
    let request = peer.recv_json().await.unwrap();
    assert_eq!(request["method"], 10001);
    assert_eq!(request["params"], json!([]));
    assert_eq!(request["seq"], call.seq());

    peer.send_json(json!({
        "type": "Immediate",
        "method": 10001,
        "seq": call.seq(),
        "params": { "ok": true }
    }));

    assert_eq!(call.await.unwrap(), json!({ "ok": true }));
    assert_eq!(h.adapter.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ping_times_out() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;

    let call = app.method("ping").unwrap().send(json!({})).unwrap();
    let seq = call.seq();
    peer.recv_json().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let message = call.await.unwrap_err().to_string();
    assert!(message.contains("ping"));
    assert!(message.contains("took too long"));
    assert_eq!(h.adapter.pending_count(), 0);

    // A late reply is a no-op, and the session stays usable.
    peer.send_json(json!({ "type": "Immediate", "seq": seq, "params": {} }));
    let next = app.method("ping").unwrap().send(json!({})).unwrap();
    let request = peer.recv_json().await.unwrap();
    peer.send_json(json!({ "type": "Immediate", "seq": request["seq"], "params": 1 }));
    assert_eq!(next.await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_call_without_session() {
    let h = harness();
    let app = h.adapter.service("app").unwrap();

    let err = app.call("ping", json!({})).await.unwrap_err();
    assert_eq!(err, CallError::NoActiveSession("app".into()));
    assert_eq!(err.to_string(), "No active session for service app");
    assert_eq!(h.adapter.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_method() {
    let mut h = harness();
    let (app, _peer) = established(&mut h).await;

    let err = app.call("launch", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        CallError::Config(ConfigError::UnknownMethod {
            service: "app".into(),
            method: "launch".into()
        })
    );
    assert_eq!(err.to_string(), "method launch not available in app service");
}

#[tokio::test]
async fn test_params_projected_positionally() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;
    let order = app.method("order").unwrap();
    assert_eq!(order.code(), 10002);

    let _call = order.send(json!({ "qty": 2, "symbol": "BTC" })).unwrap();
    let request = peer.recv_json().await.unwrap();
    assert_eq!(request["params"], json!(["BTC", null, 2]));

    let err = order.send(json!(["BTC"])).unwrap_err();
    assert!(matches!(err, CallError::Config(ConfigError::InvalidParams { .. })));
}

#[tokio::test]
async fn test_concurrent_calls_complete_independently() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;
    let ping = app.method("ping").unwrap();

    let calls: Vec<_> = (0..3).map(|_| ping.send(json!({})).unwrap()).collect();
    let mut seqs = Vec::new();
    for _ in 0..3 {
        seqs.push(peer.recv_json().await.unwrap()["seq"].as_u64().unwrap());
    }

    for seq in seqs.iter().rev() {
        peer.send_json(json!({ "type": "Immediate", "seq": seq, "params": { "echo": seq } }));
    }

    for (call, seq) in calls.into_iter().zip(seqs) {
        assert_eq!(call.seq(), seq);
        assert_eq!(call.await.unwrap(), json!({ "echo": seq }));
    }
}

#[tokio::test]
async fn test_error_reply_rejects_and_notifies() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;

    let call = app.method("order").unwrap().send(json!({})).unwrap();
    let request = peer.recv_json().await.unwrap();
    peer.send_json(json!({
        "type": "Error",
        "method": 10002,
        "seq": request["seq"],
        "code": 7
    }));

    assert_eq!(
        call.await.unwrap_err(),
        CallError::Remote("order: insufficient funds".into())
    );
    assert_eq!(h.errors.recv().await.unwrap(), "order: insufficient funds");
}

#[tokio::test]
async fn test_uncounted_error_reuses_sequence() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;
    let ping = app.method("ping").unwrap();

    let failed = ping.send(json!({})).unwrap();
    let seq = failed.seq();
    peer.recv_json().await.unwrap();
    peer.send_json(json!({ "type": "Error", "seq": seq, "code": 3 }));
    assert!(failed.await.is_err());

    let retry = ping.send(json!({})).unwrap();
    assert_eq!(retry.seq(), seq);
}

#[tokio::test]
async fn test_events_routed_by_scheme() {
    let mut h = harness();
    let (_app, peer) = established(&mut h).await;

    peer.send_json(json!({ "resource": "invoices@9", "total": 10 }));
    peer.send_json(json!({ "resource": "orders@42", "status": "filled" }));

    let event = h.events.recv().await.unwrap();
    assert_eq!(event, json!({ "resource": "orders@42", "status": "filled" }));
    assert!(h.events.try_recv().is_err());
    assert!(h.errors.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_rejects_outstanding_calls() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;

    let call = app.method("ping").unwrap().send(json!({})).unwrap();
    peer.recv_json().await.unwrap();

    app.disconnect();
    assert_eq!(
        call.await.unwrap_err(),
        CallError::Disconnected {
            service: "app".into(),
            method: "ping".into()
        }
    );
    assert_eq!(app.state(), SessionState::Disconnected);

    assert_eq!(peer.recv().await, Some(Outbound::Close));
    let close = h.closes.recv().await.unwrap();
    assert!(close.was_clean);
    assert_eq!(close.code, 1000);

    // Idempotent.
    app.disconnect();
    assert_eq!(h.adapter.pending_count(), 0);
    assert_eq!(h.adapter.active_sessions(), 0);
}

#[tokio::test]
async fn test_server_close_fails_outstanding_calls() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;

    let call = app.method("ping").unwrap().send(json!({})).unwrap();
    peer.recv_json().await.unwrap();
    peer.close(CloseEvent::abnormal("gone"));

    assert!(matches!(call.await, Err(CallError::Disconnected { .. })));
    assert!(!h.closes.recv().await.unwrap().was_clean);
    assert_eq!(app.state(), SessionState::Disconnected);

    // A fresh session can be opened afterwards.
    let (_app, _peer) = established(&mut h).await;
}

/// Holds every `open` until the gate is released.
struct GatedConnector {
    inner: MemoryConnector,
    gate: Arc<Notify>,
}

impl Connector for GatedConnector {
    fn open(
        &self,
        remote: &str,
        protocols: &[String],
    ) -> BoxFuture<'static, Result<TransportChannel, TransportError>> {
        let inner = self.inner.clone();
        let gate = Arc::clone(&self.gate);
        let remote = remote.to_string();
        let protocols = protocols.to_vec();
        async move {
            gate.notified().await;
            inner.open(&remote, &protocols).await
        }
        .boxed()
    }
}

async fn wait_for(app: &ServiceHandle, state: SessionState) {
    while app.state() != state {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_clean_close_during_connect() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let peer = h.peers.recv().await.unwrap();
    peer.close(CloseEvent::clean(4001, "maintenance"));

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(err, ConnectError::Closed { code: 4001 });
    let close = h.closes.recv().await.unwrap();
    assert!(close.was_clean);
    assert_eq!(close.reason, "maintenance");
    assert_eq!(app.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_while_transport_opening() {
    let (inner, mut peers) = MemoryConnector::pair();
    let gate = Arc::new(Notify::new());
    let connector = GatedConnector {
        inner,
        gate: Arc::clone(&gate),
    };
    let config = AdapterConfig::builder().build().with_service(
        "app",
        ServiceConfig::builder().remote("mem://app").build(),
    );
    let adapter = WssAdapter::configure(config, connector).unwrap();
    let app = adapter.service("app").unwrap();

    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });
    wait_for(&app, SessionState::Connecting).await;

    app.disconnect();
    assert_eq!(app.state(), SessionState::Disconnected);
    gate.notify_one();

    // The late channel is closed straight away.
    assert_eq!(
        connecting.await.unwrap().unwrap_err(),
        ConnectError::Closed { code: 1000 }
    );
    let mut peer = peers.recv().await.unwrap();
    assert_eq!(peer.recv().await, Some(Outbound::Close));
    assert_eq!(app.state(), SessionState::Disconnected);
    assert_eq!(adapter.active_sessions(), 0);
}

#[tokio::test]
async fn test_disconnect_while_authenticating() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let mut peer = h.peers.recv().await.unwrap();
    wait_for(&app, SessionState::Authenticating).await;

    app.disconnect();
    assert_eq!(app.state(), SessionState::Disconnected);
    assert_eq!(peer.recv().await, Some(Outbound::Close));

    assert_eq!(
        connecting.await.unwrap().unwrap_err(),
        ConnectError::Closed { code: 1000 }
    );
    assert!(h.closes.recv().await.unwrap().was_clean);
    assert_eq!(h.adapter.active_sessions(), 0);
}

#[tokio::test]
async fn test_sole_outstanding_attribution() {
    let mut h = harness_with(|mut config| {
        config.attribution = AttributionMode::SoleOutstanding;
        config
    });
    let (app, mut peer) = established(&mut h).await;
    let ping = app.method("ping").unwrap();

    // One call outstanding: an error without a seq is its failure.
    let only = ping.send(json!({})).unwrap();
    peer.recv_json().await.unwrap();
    peer.send_json(json!({ "type": "Error", "method": 10001, "params": { "error": 7 } }));
    assert_eq!(
        only.await.unwrap_err(),
        CallError::Remote("ping: insufficient funds".into())
    );
    assert_eq!(h.errors.recv().await.unwrap(), "ping: insufficient funds");

    // Two outstanding: nobody can be blamed, both stay pending.
    let first = ping.send(json!({})).unwrap();
    let second = ping.send(json!({})).unwrap();
    peer.recv_json().await.unwrap();
    peer.recv_json().await.unwrap();
    peer.send_json(json!({ "type": "Error", "params": { "error": 7 } }));
    assert_eq!(h.errors.recv().await.unwrap(), "insufficient funds");
    assert_eq!(h.adapter.pending_count(), 2);

    for call in [first, second] {
        let seq = call.seq();
        peer.send_json(json!({ "type": "Immediate", "seq": seq, "params": seq }));
        assert_eq!(call.await.unwrap(), json!(seq));
    }
}

#[tokio::test]
async fn test_payload_error_code_compensates_sequence() {
    let mut h = harness();
    let (app, mut peer) = established(&mut h).await;
    let ping = app.method("ping").unwrap();

    let failed = ping.send(json!({})).unwrap();
    let seq = failed.seq();
    peer.recv_json().await.unwrap();
    peer.send_json(json!({ "type": "Error", "seq": seq, "params": { "error": 3 } }));
    assert!(failed.await.is_err());

    assert_eq!(ping.send(json!({})).unwrap().seq(), seq);
}

#[tokio::test]
async fn test_handshake_rejected_by_payload_error() {
    let mut h = harness();
    let app = h.adapter.service("app").unwrap();
    let connecting = tokio::spawn({
        let app = app.clone();
        async move { app.connect([TOKEN], None).await }
    });

    let peer = h.peers.recv().await.unwrap();
    peer.send_json(json!({ "params": { "error": "invalid token" } }));

    assert_eq!(
        connecting.await.unwrap().unwrap_err(),
        ConnectError::HandshakeRejected("invalid token".into())
    );
    assert_eq!(app.state(), SessionState::Disconnected);
}
