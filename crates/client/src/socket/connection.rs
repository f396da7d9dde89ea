//! Connection state and reconnect policy for the socket client.

use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use serde_json::Value;
use tokio::sync::oneshot;

/// Connection state for the socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Reconnecting { attempt: u32 },
    /// Handshake completed; `transport_id` is the server-assigned socket id.
    Connected { transport_id: String },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn transport_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { transport_id } => Some(transport_id),
            _ => None,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Reconnect attempts after the first failure before giving up
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Outbound request queued for the connection task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Emit {
    pub event: String,
    pub payload: Option<Value>,
}

/// Handle to the running connection task.
///
/// Emits are queued on an unbounded channel and flushed once the handshake
/// completes; `shutdown` stops the task.
pub(crate) struct ConnectionHandle {
    pub generation: u64,
    pub sender: UnboundedSender<Emit>,
    pub shutdown: oneshot::Sender<()>,
}

impl ConnectionHandle {
    pub fn emit(&self, event: &str, payload: Option<Value>) -> Result<(), String> {
        self.sender
            .unbounded_send(Emit {
                event: event.to_string(),
                payload,
            })
            .map_err(|e| format!("Failed to queue {event}: {e}"))
    }
}
