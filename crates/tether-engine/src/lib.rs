//! Lockstep orchestration of a simulator over shared memory.
//!
//! [`Environment`] is the entry point. It launches (or attaches to) a
//! simulator, allocates the shared buffers the scenario implies, and
//! drives one tick per call through a [`Handshake`](tether_core::Handshake):
//!
//! 1. flush queued commands into `command_buffer` and raise `command_bool`,
//! 2. release the simulator,
//! 3. acquire it back, bounded by the tick timeout,
//! 4. clear consumed flags and advance sensor publication periods,
//! 5. resolve acoustic and optical messaging.
//!
//! The supporting pieces are usable on their own: [`TickEngine`] for the
//! handshake sequence, [`AgentRegistry`] for agent and sensor buffers,
//! [`SimulatorProcess`] for the launch contract, and [`Scenario`] for
//! scenario files.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod config;
pub mod environment;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod registry;
pub mod scenario;
#[cfg(unix)]
pub mod semaphore;
pub mod shared;
pub mod state;
pub mod tick;

pub use config::{
    EnvironmentConfig, FrameCap, LaunchConfig, RatePolicy, StateMode, TimeoutConfig,
};
pub use environment::{Catalogs, Environment};
pub use error::{ConfigError, EnvError, LaunchError};
#[cfg(unix)]
pub use handshake::SemaphoreHandshake;
pub use handshake::{channel_pair, ChannelHandshake, ChannelPeer};
pub use launcher::SimulatorProcess;
pub use registry::{Agent, AgentRegistry, Sensor};
pub use scenario::{AgentConfig, Scenario, SensorConfig};
pub use shared::SharedEnvironment;
pub use state::{AgentState, SensorData, StateSnapshot};
pub use tick::{TickEngine, TickReport, TimeoutPolicy};
