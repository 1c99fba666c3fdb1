//! Engine-level error types.
//!
//! [`ConfigError`] covers everything rejected at the call that caused
//! it. [`LaunchError`] covers starting the simulator process.
//! [`EnvError`] is what the [`Environment`](crate::Environment) API
//! returns; [`EnvError::is_fatal`] tells the caller whether the
//! environment survived.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tether_comms::CommsError;
use tether_core::{CatalogError, HandshakeError};
use tether_shm::ShmError;
use tether_wire::WireError;
use thiserror::Error;

// ── ConfigError ───────────────────────────────────────────────────

/// Invalid configuration or request, detected before anything is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `ticks_per_sec` is zero.
    #[error("ticks_per_sec must be at least 1")]
    InvalidTickRate,
    /// Window width or height is zero.
    #[error("window size {width}x{height} is invalid")]
    InvalidWindow {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },
    /// The command buffer cannot hold even an empty document.
    #[error("command capacity {capacity} is below the minimum of {minimum} bytes")]
    InvalidCapacity {
        /// Configured capacity.
        capacity: usize,
        /// Smallest usable capacity.
        minimum: usize,
    },
    /// The tick timeout is zero.
    #[error("tick timeout must be non-zero")]
    InvalidTimeout,
    /// The uuid cannot be embedded in region and semaphore names.
    #[error("uuid {uuid:?} may not contain '/' or NUL")]
    InvalidUuid {
        /// The rejected uuid.
        uuid: String,
    },
    /// A bound is not finite, or a minimum is not below its maximum.
    #[error("invalid {what}: {reason}")]
    InvalidBounds {
        /// Which bound.
        what: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// A sensor rate is zero, negative or not finite.
    #[error("sensor {agent}/{sensor} has invalid rate {hz} Hz")]
    InvalidSensorRate {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
        /// Configured rate.
        hz: f64,
    },
    /// A sensor samples faster than the simulation ticks.
    #[error("sensor {agent}/{sensor} samples at {hz} Hz, faster than {ticks_per_sec} ticks per second")]
    SensorRateTooHigh {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
        /// Configured rate.
        hz: f64,
        /// Simulation tick rate.
        ticks_per_sec: u32,
    },
    /// A sensor rate does not divide the tick rate and rounding is off.
    #[error("sensor {agent}/{sensor} rate {hz} Hz does not divide {ticks_per_sec} ticks per second")]
    UnevenSensorRate {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
        /// Configured rate.
        hz: f64,
        /// Simulation tick rate.
        ticks_per_sec: u32,
    },
    /// An agent with this name already exists.
    #[error("duplicate agent name '{name}'")]
    DuplicateAgent {
        /// The repeated name.
        name: String,
    },
    /// The agent already has a sensor with this name.
    #[error("agent '{agent}' already has a sensor named '{sensor}'")]
    DuplicateSensor {
        /// Owning agent.
        agent: String,
        /// The repeated name.
        sensor: String,
    },
    /// No agent with this name.
    #[error("no agent named '{name}'")]
    UnknownAgent {
        /// The requested name.
        name: String,
    },
    /// No sensor with this name on the agent.
    #[error("agent '{agent}' has no sensor named '{sensor}'")]
    UnknownSensor {
        /// Owning agent.
        agent: String,
        /// The requested name.
        sensor: String,
    },
    /// `main_agent` names an agent the scenario does not declare.
    #[error("main_agent '{name}' is not declared in the scenario")]
    UnknownMainAgent {
        /// The requested name.
        name: String,
    },
    /// An action has more elements than the agent's action buffer.
    #[error("action for '{agent}' has {len} elements, the buffer holds {capacity}")]
    ActionTooLong {
        /// Target agent.
        agent: String,
        /// Supplied length.
        len: usize,
        /// Buffer length.
        capacity: usize,
    },
    /// Render quality outside 0..=3.
    #[error("render quality {quality} is outside 0..=3")]
    InvalidRenderQuality {
        /// The rejected level.
        quality: u8,
    },
    /// Capture rate of zero ticks.
    #[error("ticks_per_capture for {agent}/{sensor} must be at least 1")]
    InvalidCaptureRate {
        /// Owning agent.
        agent: String,
        /// Camera sensor.
        sensor: String,
    },
    /// The sensor is not an RGB camera.
    #[error("{agent}/{sensor} is a {sensor_type}, not an RGBCamera")]
    NotACamera {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
        /// Its actual type.
        sensor_type: String,
    },
    /// Unknown type or bad sensor configuration block.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Scenario JSON could not be parsed.
    #[error("scenario parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Scenario file could not be read.
    #[error("cannot read scenario {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

// ── LaunchError ───────────────────────────────────────────────────

/// Failures starting the simulator process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The binary does not exist.
    #[error("simulator binary {path} not found")]
    MissingBinary {
        /// Configured path.
        path: PathBuf,
    },
    /// The process could not be spawned.
    #[error("failed to spawn simulator {path}: {source}")]
    Spawn {
        /// Configured path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The loading semaphore could not be created or waited on.
    #[error("loading semaphore {name}: {source}")]
    Semaphore {
        /// Semaphore name.
        name: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The simulator did not signal boot completion in time.
    #[error("timed out after {timeout:?} waiting for the simulator to load; make sure it is not run with root privileges")]
    BootTimeout {
        /// The boot deadline.
        timeout: Duration,
    },
    /// The simulator exited before signalling boot completion.
    #[error("simulator exited during boot with {status}")]
    ExitedDuringBoot {
        /// Its exit status.
        status: ExitStatus,
    },
    /// Launching is only implemented on POSIX hosts.
    #[error("launching the simulator is not supported on this platform")]
    Unsupported,
}

// ── EnvError ──────────────────────────────────────────────────────

/// Error returned by [`Environment`](crate::Environment) operations.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Rejected configuration or request.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The simulator could not be started.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// The tick handshake failed or timed out.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// A shared-memory region could not be created or mapped.
    #[error(transparent)]
    Shm(#[from] ShmError),
    /// A command could not be encoded or queued.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A messaging request was invalid.
    #[error(transparent)]
    Comms(#[from] CommsError),
    /// `step` or `tick` before the first `reset`.
    #[error("reset() must be called before step() or tick()")]
    NotReset,
    /// `step` on an environment without a main agent.
    #[error("no main agent to apply the action to")]
    NoMainAgent,
    /// A tick count of zero.
    #[error("tick count must be at least 1")]
    InvalidTickCount,
    /// Another caller holds the environment.
    #[error("environment is busy with another call")]
    Busy,
    /// The environment was closed, or a fatal error tore it down.
    #[error("environment has been torn down")]
    TornDown,
}

impl EnvError {
    /// `true` when the environment is no longer usable: timeouts and
    /// other handshake failures, launch failures, shared-memory failures.
    /// The environment tears itself down before returning such an error.
    /// A refused region descriptor is a configuration error, not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Shm(e)
            | Self::Wire(WireError::Shm(e))
            | Self::Comms(CommsError::Wire(WireError::Shm(e))) => !e.is_configuration(),
            Self::Launch(_) | Self::Handshake(_) | Self::TornDown => true,
            _ => false,
        }
    }

    /// `true` for protocol errors: an unknown message type or a
    /// malformed wire payload.
    pub fn is_protocol(&self) -> bool {
        match self {
            Self::Comms(e) => e.is_protocol(),
            Self::Wire(WireError::Malformed { .. }) => true,
            _ => false,
        }
    }

    /// `true` for a handshake timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Handshake(e) if e.is_timeout())
    }
}
