//! Connection state machine
//!
//! Exactly one `ConnectionStatus` is live per bridge session, owned by the
//! `StatusCell`. Transitions follow the fixed edge set below and every
//! accepted transition is broadcast to subscribers. Error and Disconnected
//! do not auto-recover; a fresh start() is required.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

/// Connection status of one bridge session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// One broadcast transition: the new status plus an optional message.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: ConnectionStatus,
    pub message: Option<String>,
}

/// Holds the live status and broadcasts transitions.
///
/// Late subscribers only see future transitions; callers needing the
/// current value query [`StatusCell::current`] directly.
pub struct StatusCell {
    current: Mutex<ConnectionStatus>,
    changes: broadcast::Sender<StatusChange>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(ConnectionStatus::Disconnected),
            changes,
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        self.current.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Disconnected/Error -> Connecting. Refused when already Connected
    /// (start() treats that as a no-op) or when another start is in flight.
    pub fn begin_connecting(&self) -> Option<StatusChange> {
        let mut current = self.current.lock();
        if matches!(
            *current,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            return None;
        }
        *current = ConnectionStatus::Connecting;
        drop(current);
        Some(self.publish(ConnectionStatus::Connecting, None))
    }

    /// Connecting -> Connected, on a successful probe.
    pub fn mark_connected(&self) -> Option<StatusChange> {
        let mut current = self.current.lock();
        if *current != ConnectionStatus::Connecting {
            return None;
        }
        *current = ConnectionStatus::Connected;
        drop(current);
        Some(self.publish(ConnectionStatus::Connected, None))
    }

    /// Connecting/Connected -> Error, carrying the full diagnostic message.
    /// Refused from other states so a richer earlier diagnostic survives.
    pub fn fail(&self, message: &str) -> Option<StatusChange> {
        let mut current = self.current.lock();
        if !matches!(
            *current,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            return None;
        }
        *current = ConnectionStatus::Error(message.to_string());
        drop(current);
        Some(self.publish(
            ConnectionStatus::Error(message.to_string()),
            Some(message.to_string()),
        ))
    }

    /// Any state -> Disconnected, on stop() completing. No-op when already
    /// Disconnected so repeated stop() stays silent.
    pub fn reset(&self) -> Option<StatusChange> {
        let mut current = self.current.lock();
        if *current == ConnectionStatus::Disconnected {
            return None;
        }
        *current = ConnectionStatus::Disconnected;
        drop(current);
        Some(self.publish(ConnectionStatus::Disconnected, None))
    }

    fn publish(&self, status: ConnectionStatus, message: Option<String>) -> StatusChange {
        let change = StatusChange { status, message };
        // No live subscribers is fine.
        let _ = self.changes.send(change.clone());
        change
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
