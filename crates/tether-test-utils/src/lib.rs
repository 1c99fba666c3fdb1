//! Test utilities for Tether development.
//!
//! [`FakeSimulator`] plays the simulator's side of the shared-memory
//! contract inside the test process. [`fake_environment`] wires one to
//! an [`Environment`] over a throwaway region root.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod sim;

pub use sim::{FakeSimulator, SimHandle, OPTICAL_RANGE, SOUND_SPEED};

use tempfile::TempDir;
use tether_engine::{EnvError, Environment, EnvironmentConfig, Scenario};
use tether_shm::ShmConfig;

/// Config rooted in a fresh temp directory, with the exit hook off.
/// Keep the directory alive for as long as the environment.
pub fn test_config() -> (EnvironmentConfig, TempDir) {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir: {e}"),
    };
    let config = EnvironmentConfig {
        shm: ShmConfig::with_root(dir.path()),
        install_exit_hook: false,
        ..EnvironmentConfig::default()
    };
    (config, dir)
}

/// An environment driven inline by a [`FakeSimulator`].
pub fn fake_environment(scenario: Scenario) -> (Environment, SimHandle, TempDir) {
    let (config, dir) = test_config();
    match fake_environment_with(config, scenario) {
        Ok((env, sim)) => (env, sim, dir),
        Err(e) => panic!("fake environment: {e}"),
    }
}

/// Like [`fake_environment`] with an explicit config. Scenario
/// overrides are applied before the simulator attaches.
pub fn fake_environment_with(
    mut config: EnvironmentConfig,
    scenario: Scenario,
) -> Result<(Environment, SimHandle), EnvError> {
    config.apply_scenario(&scenario);
    let sim = FakeSimulator::new(&config)?;
    let handle = sim.handle();
    let env = Environment::with_handshake(config, scenario, sim)?;
    Ok((env, handle))
}

/// One agent of `agent_type` named `name`, marked main.
pub fn single_agent(name: &str, agent_type: &str) -> Scenario {
    Scenario {
        name: "test".to_string(),
        world: "TestWorld".to_string(),
        main_agent: Some(name.to_string()),
        agents: vec![tether_engine::AgentConfig::new(name, agent_type)],
        ..Scenario::default()
    }
}
