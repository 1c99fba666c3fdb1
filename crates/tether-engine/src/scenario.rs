//! Scenario description: the world to load and the agents to spawn.
//!
//! Scenarios arrive as JSON from the package manager. Keys follow the
//! package format (`agent_name`, `sensor_type`, `Hz`, ...); everything
//! except `agent_type` and `sensor_type` is optional.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{AgentCatalog, SensorCatalog};

use crate::config::FrameCap;
use crate::error::ConfigError;

/// A loaded scenario.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    #[serde(default)]
    pub name: String,
    /// World (map) to load.
    #[serde(default)]
    pub world: String,
    /// Package providing the world.
    #[serde(default)]
    pub package_name: String,
    /// Agent the viewport follows and `step` acts on.
    #[serde(default)]
    pub main_agent: Option<String>,
    /// Overrides the configured tick rate.
    #[serde(default)]
    pub ticks_per_sec: Option<u32>,
    /// Overrides the configured frame cap.
    #[serde(default)]
    pub frames_per_sec: Option<FrameCap>,
    /// Overrides the configured window width.
    #[serde(default)]
    pub window_width: Option<u32>,
    /// Overrides the configured window height.
    #[serde(default)]
    pub window_height: Option<u32>,
    /// Lower world bound for the launch arguments.
    #[serde(default)]
    pub env_min: Option<[f64; 3]>,
    /// Upper world bound for the launch arguments.
    #[serde(default)]
    pub env_max: Option<[f64; 3]>,
    /// Smallest octree leaf.
    #[serde(default)]
    pub octree_min: Option<f64>,
    /// Largest octree leaf.
    #[serde(default)]
    pub octree_max: Option<f64>,
    /// Agents, spawned in order at every reset.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// One agent of a scenario.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique name. Defaults to the agent type.
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Catalog agent type.
    pub agent_type: String,
    /// Initial control scheme.
    #[serde(default)]
    pub control_scheme: u8,
    /// Spawn location.
    #[serde(default)]
    pub location: [f64; 3],
    /// Spawn rotation (roll, pitch, yaw) in degrees.
    #[serde(default)]
    pub rotation: [f64; 3],
    /// Per-axis half-width of a uniform offset added to the location.
    #[serde(default)]
    pub location_randomization: [f64; 3],
    /// Per-axis half-width of a uniform offset added to the rotation.
    #[serde(default)]
    pub rotation_randomization: [f64; 3],
    /// Already present in the world; no spawn command is sent.
    #[serde(default)]
    pub existing: bool,
    /// Attached sensors.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl AgentConfig {
    /// Agent of `agent_type` named `name`.
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_name: Some(name.into()),
            agent_type: agent_type.into(),
            ..Self::default()
        }
    }

    /// The agent's name.
    pub fn name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(&self.agent_type)
    }

    /// Builder-style sensor attachment.
    pub fn with_sensor(mut self, sensor: SensorConfig) -> Self {
        self.sensors.push(sensor);
        self
    }

    /// Builder-style spawn location.
    pub fn at(mut self, location: [f64; 3]) -> Self {
        self.location = location;
        self
    }
}

/// One sensor of an agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Catalog sensor type.
    pub sensor_type: String,
    /// Unique name on the agent. Defaults to the sensor type.
    #[serde(default)]
    pub sensor_name: Option<String>,
    /// Offset from the socket.
    #[serde(default)]
    pub location: [f64; 3],
    /// Rotation relative to the socket in degrees.
    #[serde(default)]
    pub rotation: [f64; 3],
    /// Mesh socket, empty for the agent root.
    #[serde(default)]
    pub socket: String,
    /// Sensor-specific configuration block.
    #[serde(default)]
    pub configuration: Option<Value>,
    /// Already attached in the world; no add command is sent.
    #[serde(default)]
    pub existing: bool,
    /// Sample rate. Defaults to the tick rate.
    #[serde(default, rename = "Hz")]
    pub hz: Option<f64>,
}

impl SensorConfig {
    /// Sensor of `sensor_type` with default settings.
    pub fn new(sensor_type: impl Into<String>) -> Self {
        Self {
            sensor_type: sensor_type.into(),
            ..Self::default()
        }
    }

    /// The sensor's name.
    pub fn name(&self) -> &str {
        self.sensor_name.as_deref().unwrap_or(&self.sensor_type)
    }

    /// Builder-style name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.sensor_name = Some(name.into());
        self
    }

    /// Builder-style sample rate.
    pub fn hz(mut self, hz: f64) -> Self {
        self.hz = Some(hz);
        self
    }

    /// Builder-style configuration block.
    pub fn configured(mut self, configuration: Value) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// The configuration block, `{}` when absent.
    pub fn configuration(&self) -> Value {
        self.configuration
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

impl Scenario {
    /// Parse a scenario from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a scenario file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check names and types against the catalogs.
    ///
    /// Sensor rates are checked when agents are built, since they depend
    /// on the resolved tick rate.
    pub fn validate(
        &self,
        sensors: &SensorCatalog,
        agents: &AgentCatalog,
    ) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for agent in &self.agents {
            agents.resolve(&agent.agent_type)?;
            if !names.insert(agent.name()) {
                return Err(ConfigError::DuplicateAgent {
                    name: agent.name().to_string(),
                });
            }
            let randomization = agent
                .location_randomization
                .iter()
                .chain(&agent.rotation_randomization);
            for d in randomization {
                if !(d.is_finite() && *d >= 0.0) {
                    return Err(ConfigError::InvalidBounds {
                        what: "randomization",
                        reason: format!("{}: half-width {d} must be finite and >= 0", agent.name()),
                    });
                }
            }
            let mut sensor_names = HashSet::new();
            for sensor in &agent.sensors {
                sensors.resolve(&sensor.sensor_type, &sensor.configuration())?;
                if !sensor_names.insert(sensor.name()) {
                    return Err(ConfigError::DuplicateSensor {
                        agent: agent.name().to_string(),
                        sensor: sensor.name().to_string(),
                    });
                }
            }
        }
        if let Some(main) = &self.main_agent {
            if !names.contains(main.as_str()) {
                return Err(ConfigError::UnknownMainAgent { name: main.clone() });
            }
        }
        Ok(())
    }

    /// `true` if `name` is the main agent.
    pub fn is_main(&self, name: &str) -> bool {
        self.main_agent.as_deref() == Some(name)
    }
}
