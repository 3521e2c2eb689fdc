//! Notifications a manager sends to its owner.

use serde::Serialize;
use starwire_types::{ManagerId, PropertyVector};
use tokio::sync::mpsc;

/// Connection lifecycle of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by a manager or its dispatcher.
///
/// Devices are named by their protocol name; `label` fields carry the
/// locally unique display label.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    StateChanged {
        manager: ManagerId,
        state: ConnectionState,
    },
    NewDevice {
        manager: ManagerId,
        device: String,
        label: String,
    },
    DeviceRemoved {
        manager: ManagerId,
        device: String,
        label: String,
    },
    PropertyDefined {
        manager: ManagerId,
        device: String,
        vector: PropertyVector,
    },
    PropertyUpdated {
        manager: ManagerId,
        device: String,
        vector: PropertyVector,
    },
    PropertyRemoved {
        manager: ManagerId,
        device: String,
        property: String,
    },
    /// Free-form text from a driver; `device` is the device label, `None` for
    /// general messages.
    Message {
        manager: ManagerId,
        device: Option<String>,
        timestamp: String,
        text: String,
    },
    /// A malformed element or a command that could not be applied
    ProtocolError { manager: ManagerId, error: String },
    ConnectionError {
        manager: ManagerId,
        host: String,
        port: u16,
        error: String,
    },
    /// One line of the local server's stderr
    ServerOutput { manager: ManagerId, line: String },
}

impl ManagerEvent {
    #[must_use]
    pub const fn manager(&self) -> ManagerId {
        match self {
            Self::StateChanged { manager, .. }
            | Self::NewDevice { manager, .. }
            | Self::DeviceRemoved { manager, .. }
            | Self::PropertyDefined { manager, .. }
            | Self::PropertyUpdated { manager, .. }
            | Self::PropertyRemoved { manager, .. }
            | Self::Message { manager, .. }
            | Self::ProtocolError { manager, .. }
            | Self::ConnectionError { manager, .. }
            | Self::ServerOutput { manager, .. } => *manager,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ManagerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ManagerEvent>;

/// Create the channel managers report through.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
