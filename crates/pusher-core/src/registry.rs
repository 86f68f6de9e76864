//! Process-wide session registry.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SessionError;
use crate::session::Session;

/// Opaque session handle. Zero is never issued and marks an invalid handle.
pub type Handle = u64;

/// Handle table owning every live session.
///
/// Handles are monotonically increasing and never reused, so a stale handle
/// from a closed session cannot alias a new one.
pub struct Registry {
    sessions: HashMap<Handle, Session>,
    next_handle: Handle,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Register a session, returning its new handle.
    pub fn insert(&mut self, session: Session) -> Handle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sessions.insert(handle, session);
        debug!(handle, sessions = self.sessions.len(), "session registered");
        handle
    }

    /// Borrow a connected session.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut Session, SessionError> {
        match self.sessions.get_mut(&handle) {
            Some(session) if session.is_connected() => Ok(session),
            _ => Err(SessionError::InvalidHandle(handle)),
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Session> {
        self.sessions.remove(&handle)
    }

    /// Close and drop every session. The handle counter keeps running.
    pub fn shutdown(&mut self) {
        for (handle, mut session) in self.sessions.drain() {
            debug!(handle, "closing session on shutdown");
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// The single process-wide registry. All session operations serialize on
/// this lock; it is never handed out to callers.
pub(crate) fn global() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::new()))
}
