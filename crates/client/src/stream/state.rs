//! Connection state machine shared by the session tasks and the facade

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Closing,
}

impl ConnectionState {
    /// An open socket, whether or not it has authenticated
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Authenticating | ConnectionState::Authenticated
        )
    }

    /// States in which the keep-alive task sends pings
    pub fn wants_keepalive(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cloneable handle to the state; every method holds the lock only for the
/// read or write itself
#[derive(Debug, Clone)]
pub struct SessionState {
    inner: Arc<Mutex<ConnectionState>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConnectionState::Disconnected)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        // State is a plain Copy value; a poisoned lock still holds a valid one
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> ConnectionState {
        *self.lock()
    }

    fn set(&self, next: ConnectionState) {
        let mut state = self.lock();
        if *state != next {
            debug!("Connection state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Move `from` -> `to` atomically; returns whether the transition happened
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        let mut state = self.lock();
        if from.contains(&*state) {
            debug!("Connection state {} -> {}", *state, to);
            *state = to;
            true
        } else {
            false
        }
    }

    /// Disconnected -> Connecting; false if a connection already exists or is in progress
    pub fn begin_connect(&self) -> bool {
        self.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting)
    }

    /// A fresh connection always starts unauthenticated
    pub fn mark_connected(&self) {
        self.transition(&[ConnectionState::Connecting], ConnectionState::Connected);
    }

    /// Connected -> Authenticating
    pub fn begin_auth(&self) -> bool {
        self.transition(&[ConnectionState::Connected], ConnectionState::Authenticating)
    }

    pub fn auth_succeeded(&self) -> bool {
        self.transition(&[ConnectionState::Authenticating], ConnectionState::Authenticated)
    }

    /// Rejection or timeout leaves the socket usable but unauthenticated
    pub fn auth_rejected(&self) -> bool {
        self.transition(&[ConnectionState::Authenticating], ConnectionState::Connected)
    }

    pub fn begin_close(&self) -> bool {
        self.transition(
            &[
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Authenticating,
                ConnectionState::Authenticated,
            ],
            ConnectionState::Closing,
        )
    }

    pub fn mark_disconnected(&self) {
        self.set(ConnectionState::Disconnected);
    }

    pub fn is_open(&self) -> bool {
        self.get().is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.get() == ConnectionState::Authenticated
    }
}
