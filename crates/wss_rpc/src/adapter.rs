use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AdapterConfig;
use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::pending::PendingTable;
use crate::registry::Registry;
use crate::sequence::Sequencer;
use crate::service::ServiceHandle;
use crate::session::{SessionMap, SessionState};
use crate::transport::{Connector, WebSocketConnector};

/// State shared by every service of one adapter.
pub(crate) struct Shared {
    pub registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
    pub pending: Arc<PendingTable>,
    pub sequencer: Arc<Sequencer>,
    pub sessions: Arc<SessionMap>,
    pub connector: Arc<dyn Connector>,
    pub timeout: Duration,
    pub handshake_method: i64,
}

/// The engine: one context object owning the sequencer, the pending-call
/// table, the session map, and the per-service façades.
///
/// Cloning is cheap; clones share the same state. Independent adapters in
/// one process share nothing.
///
/// # Example
///
/// ```ignore
/// let adapter = WssAdapter::configure(config, WebSocketConnector::new())?;
/// let app = adapter.service("app")?;
/// app.connect(["access-token"], None).await?;
///
/// let ping = app.method("ping")?;
/// let reply = ping.call(serde_json::json!({})).await?;
/// ```
#[derive(Clone)]
pub struct WssAdapter {
    shared: Arc<Shared>,
}

impl WssAdapter {
    /// Validate `config` and build an adapter that opens channels with `connector`.
    pub fn configure<C>(config: AdapterConfig, connector: C) -> Result<Self, ConfigError>
    where
        C: Connector,
    {
        let registry = Arc::new(Registry::build(&config)?);
        let pending = Arc::new(PendingTable::new());
        let sequencer = Arc::new(Sequencer::new());

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            config.errors.clone(),
            Arc::clone(&pending),
            Arc::clone(&sequencer),
            config.attribution,
            config.on_error.clone(),
        );

        info!(
            services = ?registry.names(),
            timeout_ms = config.timeout_ms,
            language = %config.errors.language,
            "Adapter configured"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                dispatcher,
                pending,
                sequencer,
                sessions: Arc::new(SessionMap::new()),
                connector: Arc::new(connector),
                timeout: config.timeout(),
                handshake_method: config.handshake_method,
            }),
        })
    }

    /// Build an adapter over WebSocket channels.
    pub fn websocket(config: AdapterConfig) -> Result<Self, ConfigError> {
        Self::configure(config, WebSocketConnector::new())
    }

    /// Façade for a configured service.
    pub fn service(&self, name: &str) -> Result<ServiceHandle, ConfigError> {
        let entry = self
            .shared
            .registry
            .get(name)
            .ok_or_else(|| ConfigError::UnknownService(name.to_string()))?;
        Ok(ServiceHandle::new(Arc::clone(&self.shared), Arc::clone(entry)))
    }

    /// Names of every configured service, sorted.
    pub fn services(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    pub fn session_state(&self, service: &str) -> SessionState {
        self.shared.sessions.state(service)
    }

    pub fn is_connected(&self, service: &str) -> bool {
        self.session_state(service) == SessionState::Established
    }

    /// Number of services with a session in any state.
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Number of calls awaiting completion across all services.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// The most recently allocated correlation identifier.
    pub fn last_seq(&self) -> u64 {
        self.shared.sequencer.current()
    }
}

impl fmt::Debug for WssAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WssAdapter")
            .field("services", &self.shared.registry.names())
            .field("sessions", &self.shared.sessions)
            .field("pending", &self.shared.pending)
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}
