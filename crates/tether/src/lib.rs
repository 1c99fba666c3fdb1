//! Tether: a lockstep client for shared-memory robotics simulators.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Tether sub-crates. For most users, adding `tether` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! Against a real simulator, build the environment with
//! [`Environment::launch`](engine::Environment::launch). The example below
//! drives the in-process fake from `tether-test-utils` instead.
//!
//! ```rust
//! use tether::prelude::*;
//! use tether_test_utils::fake_environment;
//!
//! let scenario = Scenario {
//!     name: "quickstart".into(),
//!     world: "TestWorld".into(),
//!     main_agent: Some("auv0".into()),
//!     agents: vec![AgentConfig::new("auv0", "HoveringAUV")
//!         .with_sensor(SensorConfig::new("LocationSensor"))],
//!     ..Scenario::default()
//! };
//! let (mut env, _sim, _dir) = fake_environment(scenario);
//! env.reset().unwrap();
//!
//! let mut action = vec![0.0_f32; 8];
//! action[0] = 1.0;
//! let state = env.step(&action, 1).unwrap();
//! let location = state.single().unwrap().get("LocationSensor").unwrap();
//! assert_eq!(location.as_f32().unwrap()[0], 1.0);
//! env.close();
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tether-core` | IDs, buffer specs, catalogs, commands, the `Handshake` trait |
//! | [`shm`] | `tether-shm` | Shared-memory regions and typed buffer views |
//! | [`wire`] | `tether-wire` | Command wire encoding and the bounded command queue |
//! | [`comms`] | `tether-comms` | Acoustic beacons and optical modems |
//! | [`engine`] | `tether-engine` | Tick handshake, registry, launch, `Environment` |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, catalogs, and the handshake trait (`tether-core`).
///
/// Contains [`types::BufferSpec`], [`types::CommandPayload`], the sensor
/// and agent catalogs, and [`types::Handshake`].
pub use tether_core as types;

/// Shared-memory regions (`tether-shm`).
///
/// [`shm::RegionManager`] creates and unlinks the named regions;
/// [`shm::ClientBuffer`] and [`shm::SimBuffer`] are the typed views.
pub use tether_shm as shm;

/// Command wire format (`tether-wire`).
///
/// [`wire::CommandCenter`] queues commands and flushes them into the
/// command buffer once per tick.
pub use tether_wire as wire;

/// Simulated underwater communications (`tether-comms`).
pub use tether_comms as comms;

/// Environment orchestration (`tether-engine`).
///
/// [`engine::Environment`] for single-owner use,
/// [`engine::SharedEnvironment`] for a handle shared across threads.
pub use tether_engine as engine;

/// Common imports for typical Tether usage.
///
/// ```rust
/// use tether::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use tether_core::{CommandPayload, DeviceId, Handshake, Recipient, TickId};

    // Errors
    pub use tether_comms::CommsError;
    pub use tether_engine::{ConfigError, EnvError, LaunchError};
    pub use tether_shm::ShmError;
    pub use tether_wire::WireError;

    // Messaging
    pub use tether_comms::{AcousticMessage, MessageType, OpticalMessage, SendOutcome};

    // Engine
    pub use tether_engine::{
        AgentConfig, AgentState, Environment, EnvironmentConfig, LaunchConfig, Scenario,
        SensorConfig, SensorData, SharedEnvironment, StateSnapshot,
    };
}
