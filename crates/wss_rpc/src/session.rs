use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ConnectError;
use crate::transport::Outbound;

/// Lifecycle of one service's session.
///
/// A closed session is destroyed, so `Closed` is observed as `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// The transport is being opened.
    Connecting,
    /// The transport is open; waiting for the first message.
    Authenticating,
    /// Handshake done; calls are accepted.
    Established,
}

struct SessionSlot {
    id: Uuid,
    state: SessionState,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

/// Live sessions, at most one per service.
///
/// When a session is created, a guard is returned that removes the session
/// when dropped. The guard only removes the session it created, so a stale
/// guard never tears down a newer session of the same service.
pub struct SessionMap {
    sessions: DashMap<String, SessionSlot, ahash::RandomState>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::default(),
        }
    }

    /// Try to create a session in the `Connecting` state.
    ///
    /// Returns an error if a session already exists for this service.
    pub fn try_create(self: &Arc<Self>, service: &str) -> Result<SessionGuard, ConnectError> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(service.to_string()) {
            Entry::Occupied(_) => Err(ConnectError::SessionAlreadyActive(service.to_string())),
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                slot.insert(SessionSlot {
                    id,
                    state: SessionState::Connecting,
                    outbound: None,
                });
                Ok(SessionGuard {
                    service: service.to_string(),
                    id,
                    map: Arc::clone(self),
                })
            }
        }
    }

    /// Record the opened transport; the session starts authenticating.
    pub fn attach(&self, guard: &SessionGuard, outbound: mpsc::UnboundedSender<Outbound>) -> bool {
        self.update(guard, |slot| {
            slot.outbound = Some(outbound);
            slot.state = SessionState::Authenticating;
        })
    }

    /// Mark the handshake as done.
    pub fn establish(&self, guard: &SessionGuard) -> bool {
        self.update(guard, |slot| slot.state = SessionState::Established)
    }

    /// Sender for an established session.
    pub fn sender(&self, service: &str) -> Option<mpsc::UnboundedSender<Outbound>> {
        self.sessions
            .get(service)
            .filter(|slot| slot.state == SessionState::Established)
            .and_then(|slot| slot.outbound.clone())
    }

    pub fn state(&self, service: &str) -> SessionState {
        self.sessions
            .get(service)
            .map_or(SessionState::Disconnected, |slot| slot.state)
    }

    /// Remove the session and return its transport sender, if it had one.
    pub fn take(&self, service: &str) -> Option<Option<mpsc::UnboundedSender<Outbound>>> {
        self.sessions
            .remove(service)
            .map(|(_, slot)| slot.outbound)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    fn update<F>(&self, guard: &SessionGuard, f: F) -> bool
    where
        F: FnOnce(&mut SessionSlot),
    {
        match self.sessions.get_mut(&guard.service) {
            Some(mut slot) if slot.id == guard.id => {
                f(&mut slot);
                true
            }
            _ => false,
        }
    }

    /// Remove a session directly (used internally by SessionGuard).
    fn remove(&self, service: &str, id: Uuid) -> bool {
        self.sessions
            .remove_if(service, |_, slot| slot.id == id)
            .is_some()
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_map();
        for slot in self.sessions.iter() {
            f.entry(slot.key(), &slot.state);
        }
        f.finish()
    }
}

/// A guard that holds an active session. When dropped, the session is removed.
pub struct SessionGuard {
    service: String,
    id: Uuid,
    map: Arc<SessionMap>,
}

impl SessionGuard {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Connection id used to tag log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the session now; returns whether it was still present.
    pub fn release(&self) -> bool {
        self.map.remove(&self.service, self.id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.map.remove(&self.service, self.id);
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("service", &self.service)
            .field("id", &self.id)
            .finish()
    }
}
