//! Error types shared across the workspace.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A type name could not be resolved against a catalog.
///
/// These are configuration errors: they surface at scenario load or at
/// the call that named the type, never per tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No sensor type with this name is registered.
    #[error("unknown sensor type '{name}'")]
    UnknownSensorType {
        /// The unresolved name.
        name: String,
    },
    /// No agent type with this name is registered.
    #[error("unknown agent type '{name}'")]
    UnknownAgentType {
        /// The unresolved name.
        name: String,
    },
    /// A sensor configuration value has the wrong type or range.
    #[error("sensor type '{sensor_type}': invalid configuration key '{key}': {reason}")]
    InvalidSensorConfig {
        /// Sensor type being resolved.
        sensor_type: String,
        /// Offending configuration key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Unknown `SpawnProp` shape.
    #[error("'{name}' is not an available prop (box, sphere, cylinder, cone)")]
    UnknownProp {
        /// The unresolved name.
        name: String,
    },
    /// Unknown `SpawnProp` material.
    #[error("'{name}' is not an available material")]
    UnknownMaterial {
        /// The unresolved name.
        name: String,
    },
}

/// Failures of the release/acquire handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The simulator did not signal within the deadline.
    #[error("simulator did not respond within {timeout:?}")]
    Timeout {
        /// The deadline that expired.
        timeout: Duration,
    },
    /// The peer side of an in-process handshake went away.
    #[error("handshake peer disconnected")]
    Disconnected,
    /// An OS synchronization call failed.
    #[error("handshake primitive '{name}' failed: {source}")]
    Os {
        /// Name of the primitive.
        name: String,
        /// The OS error.
        #[source]
        source: io::Error,
    },
}

impl HandshakeError {
    /// `true` for [`HandshakeError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
