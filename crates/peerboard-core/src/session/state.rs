//! Connection lifecycle.

use serde::{Deserialize, Serialize};

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Fixed role chosen when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts the inbound connection and owns the initial snapshot.
    Host,
    /// Connects to a host and waits for its snapshot.
    Guest,
}

/// Tracks state and role together so they cannot drift apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifecycle {
    state: ConnectionState,
    role: Option<Role>,
}

impl Lifecycle {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// `disconnected → connecting`. Returns false if a session is already active.
    pub fn begin(&mut self, role: Role) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.role = Some(role);
        true
    }

    /// `connecting → connected`. Returns false from any other state.
    pub fn connected(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// Back to `disconnected` with no role.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.role = None;
    }
}
