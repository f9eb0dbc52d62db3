//! Listener and session lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique IDs for listeners and sessions
//! - Track every live listener and session for bulk shutdown
//! - Give each tracked resource a close handle its owning task observes
//! - Deregister on drop so every exit path releases its entry

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::observability::metrics;

/// Global atomic counter for resource IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked listener or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Idempotent close signal shared between the registry and the owning task.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    inner: Arc<CloseState>,
}

#[derive(Debug, Default)]
struct CloseState {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request close. Returns `false` if it was already requested.
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once `close` has been called, including before this call.
    pub async fn closed(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug)]
struct Tracked {
    addr: SocketAddr,
    handle: CloseHandle,
}

/// Live listeners and sessions of one server.
///
/// Each set is its own concurrent map; no operation spans both.
#[derive(Debug, Default)]
pub struct Registry {
    listeners: DashMap<ConnectionId, Tracked>,
    sessions: DashMap<ConnectionId, Tracked>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a listener bound to `local_addr`.
    pub fn track_listener(self: &Arc<Self>, local_addr: SocketAddr) -> TrackedGuard {
        let id = ConnectionId::new();
        let handle = CloseHandle::new();
        self.listeners.insert(
            id,
            Tracked {
                addr: local_addr,
                handle: handle.clone(),
            },
        );
        metrics::set_active_listeners(self.listeners.len());
        TrackedGuard {
            registry: Arc::clone(self),
            kind: Kind::Listener,
            id,
            handle,
        }
    }

    /// Track a session with the given peer.
    pub fn track_session(self: &Arc<Self>, peer_addr: SocketAddr) -> TrackedGuard {
        let id = ConnectionId::new();
        let handle = CloseHandle::new();
        self.sessions.insert(
            id,
            Tracked {
                addr: peer_addr,
                handle: handle.clone(),
            },
        );
        metrics::set_active_sessions(self.sessions.len());
        TrackedGuard {
            registry: Arc::clone(self),
            kind: Kind::Session,
            id,
            handle,
        }
    }

    /// Close and forget every tracked listener and session.
    pub fn close_all(&self) {
        self.listeners.retain(|_, tracked| {
            tracked.handle.close();
            false
        });
        self.sessions.retain(|_, tracked| {
            tracked.handle.close();
            false
        });
        metrics::set_active_listeners(0);
        metrics::set_active_sessions(0);
    }

    /// Local addresses of the live listeners.
    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|entry| entry.addr).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn untrack(&self, kind: Kind, id: ConnectionId) {
        match kind {
            Kind::Listener => {
                self.listeners.remove(&id);
                metrics::set_active_listeners(self.listeners.len());
            }
            Kind::Session => {
                self.sessions.remove(&id);
                metrics::set_active_sessions(self.sessions.len());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Listener,
    Session,
}

/// Registry membership for one listener or session.
///
/// Dropping the guard deregisters the resource and marks it closed, so the
/// owning task's teardown and a concurrent `close_all` may race safely.
#[derive(Debug)]
pub struct TrackedGuard {
    registry: Arc<Registry>,
    kind: Kind,
    id: ConnectionId,
    handle: CloseHandle,
}

impl TrackedGuard {
    /// Get this resource's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The close signal for this resource.
    pub fn handle(&self) -> &CloseHandle {
        &self.handle
    }
}

impl Drop for TrackedGuard {
    fn drop(&mut self) {
        self.handle.close();
        self.registry.untrack(self.kind, self.id);
        tracing::trace!(connection_id = %self.id, kind = ?self.kind, "Untracked");
    }
}
