//! Messaging errors.

use tether_core::DeviceId;
use tether_wire::WireError;
use thiserror::Error;

/// Errors from the messaging state machine.
#[derive(Debug, Error)]
pub enum CommsError {
    /// Message type string not in the protocol. Indicates a programming
    /// error or a client/simulator version mismatch.
    #[error("unknown acoustic message type '{name}'")]
    UnknownMessageType {
        /// The unrecognized string.
        name: String,
    },
    /// No device with this id is registered.
    #[error("no {kind} with id {id}")]
    UnknownDevice {
        /// `"beacon"` or `"modem"`.
        kind: &'static str,
        /// The missing id.
        id: DeviceId,
    },
    /// An explicitly configured id is already in use.
    #[error("{kind} id {id} is already taken by {agent}/{sensor}")]
    DuplicateDeviceId {
        /// `"beacon"` or `"modem"`.
        kind: &'static str,
        /// The contested id.
        id: DeviceId,
        /// Agent of the existing device.
        agent: String,
        /// Sensor of the existing device.
        sensor: String,
    },
    /// A device tried to message itself.
    #[error("{kind} {id} cannot message itself")]
    SelfAddressed {
        /// `"beacon"` or `"modem"`.
        kind: &'static str,
        /// The device.
        id: DeviceId,
    },
    /// The transmission command could not be queued.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl CommsError {
    /// `true` for protocol errors (as opposed to configuration errors).
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::UnknownMessageType { .. })
    }
}
