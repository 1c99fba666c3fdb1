//! The agent/sensor state registry.
//!
//! Maps agent and sensor names onto their shared buffers. Agents write
//! through [`ClientBuffer`]s (action, teleport, control scheme); sensors
//! read through [`SimBuffer`]s. Sensor sub-sampling lives here: each
//! sensor counts ticks and is *due* on a tick that completes while its
//! count equals its period. A new sensor starts with a full count, so
//! its first tick is due.

use std::fmt::Write as _;

use indexmap::IndexMap;
use tether_core::{AgentDescriptor, BufferSpec, ElementType, SensorDescriptor, SensorRole};
use tether_shm::{naming, ClientBuffer, RegionManager, SimBuffer};
use tracing::{debug, warn};

use crate::config::RatePolicy;
use crate::error::{ConfigError, EnvError};

/// Length of the teleport command buffer: location, rotation, velocity,
/// angular velocity.
pub const TELEPORT_COMMAND_LEN: usize = 12;

/// Teleport flag: move to the location.
pub const TELEPORT_LOCATION: u8 = 1;
/// Teleport flag: turn to the rotation.
pub const TELEPORT_ROTATION: u8 = 2;
/// Teleport flag: overwrite the full physics state.
pub const TELEPORT_PHYSICS_STATE: u8 = 15;

// ── Sample rates ──────────────────────────────────────────────────

/// Ticks between samples of a sensor sampling at `hz`.
///
/// `None` samples every tick. A rate above the tick rate, or one that
/// is not positive and finite, is an error. A rate that does not divide
/// the tick rate is an error under [`RatePolicy::Reject`] and rounds to
/// the nearest period under [`RatePolicy::Round`].
pub fn tick_every(
    agent: &str,
    sensor: &str,
    hz: Option<f64>,
    ticks_per_sec: u32,
    policy: RatePolicy,
) -> Result<u32, ConfigError> {
    let Some(hz) = hz else { return Ok(1) };
    let tps = f64::from(ticks_per_sec);
    if !(hz.is_finite() && hz > 0.0) {
        return Err(ConfigError::InvalidSensorRate {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
            hz,
        });
    }
    if hz > tps {
        return Err(ConfigError::SensorRateTooHigh {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
            hz,
            ticks_per_sec,
        });
    }
    let ratio = tps / hz;
    let rounded = ratio.round();
    if (ratio - rounded).abs() < 1e-9 {
        return Ok(rounded as u32);
    }
    match policy {
        RatePolicy::Reject => Err(ConfigError::UnevenSensorRate {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
            hz,
            ticks_per_sec,
        }),
        RatePolicy::Round => {
            let every = rounded.max(1.0) as u32;
            warn!(
                agent,
                sensor,
                hz,
                ticks_per_sec,
                effective_hz = tps / f64::from(every),
                "sensor rate does not divide the tick rate, rounding"
            );
            Ok(every)
        }
    }
}

// ── Sensor ────────────────────────────────────────────────────────

/// One sensor attached to an agent.
#[derive(Debug)]
pub struct Sensor {
    name: String,
    descriptor: SensorDescriptor,
    buffer: SimBuffer,
    every: u32,
    count: u32,
    due: bool,
}

impl Sensor {
    /// Sensor name, unique on its agent.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved catalog entry.
    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    /// The `{agent}_{sensor}_sensor_data` buffer.
    pub fn buffer(&self) -> &SimBuffer {
        &self.buffer
    }

    /// Ticks between samples.
    pub fn tick_every(&self) -> u32 {
        self.every
    }

    /// Ticks counted in the current period, `1..=tick_every`.
    pub fn tick_count(&self) -> u32 {
        self.count
    }

    /// Whether the last completed tick carries a sample.
    pub fn is_due(&self) -> bool {
        self.due
    }

    /// Whether the sample should appear in a snapshot: due, and not the
    /// all-NaN "no data" pattern.
    pub fn is_published(&self) -> bool {
        self.is_due() && !self.buffer.is_all_nan()
    }

    /// Count one completed tick.
    pub fn advance(&mut self) {
        self.due = self.count >= self.every;
        self.count = if self.due { 1 } else { self.count + 1 };
    }

    /// Change the period. The next tick is due.
    pub fn set_tick_every(&mut self, every: u32) {
        self.every = every.max(1);
        self.count = self.every;
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// One agent and its buffers.
#[derive(Debug)]
pub struct Agent {
    name: String,
    descriptor: AgentDescriptor,
    is_main: bool,
    control_scheme: u8,
    action: ClientBuffer,
    teleport_flag: ClientBuffer,
    teleport_command: ClientBuffer,
    control: ClientBuffer,
    sensors: IndexMap<String, Sensor>,
}

impl Agent {
    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved catalog entry.
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    /// Whether this is the main agent.
    pub fn is_main(&self) -> bool {
        self.is_main
    }

    /// Current control scheme.
    pub fn control_scheme(&self) -> u8 {
        self.control_scheme
    }

    /// Sensors in attachment order.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    /// Look up a sensor.
    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        self.sensors.get(name)
    }

    /// The last action written.
    pub fn action(&self) -> Vec<f32> {
        self.action.to_f32_vec().unwrap_or_default()
    }

    /// Names of every region this agent and its sensors map.
    pub(crate) fn region_names(&self) -> Vec<String> {
        let mut names = vec![
            naming::action(&self.name),
            naming::teleport_flag(&self.name),
            naming::teleport_command(&self.name),
            naming::control_scheme(&self.name),
        ];
        names.extend(self.sensors.keys().map(|s| naming::sensor_data(&self.name, s)));
        names
    }
}

// ── AgentRegistry ─────────────────────────────────────────────────

/// Every agent of one environment, in spawn order.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: IndexMap<String, Agent>,
    main: Option<String>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an agent's buffers and register it.
    ///
    /// The control scheme buffer is written with `control_scheme`
    /// (modulo the scheme count) straight away.
    pub fn add_agent(
        &mut self,
        regions: &mut RegionManager,
        name: &str,
        descriptor: AgentDescriptor,
        control_scheme: u8,
        is_main: bool,
    ) -> Result<&Agent, EnvError> {
        if self.agents.contains_key(name) {
            return Err(ConfigError::DuplicateAgent {
                name: name.to_string(),
            }
            .into());
        }
        let action = regions.allocate_client(
            &naming::action(name),
            BufferSpec::vector(descriptor.action_len.max(1), ElementType::F32),
        )?;
        let teleport_flag = regions.allocate_client(
            &naming::teleport_flag(name),
            BufferSpec::vector(1, ElementType::U8),
        )?;
        let teleport_command = regions.allocate_client(
            &naming::teleport_command(name),
            BufferSpec::vector(TELEPORT_COMMAND_LEN, ElementType::F32),
        )?;
        let control = regions.allocate_client(
            &naming::control_scheme(name),
            BufferSpec::vector(1, ElementType::U8),
        )?;
        action.zero();
        teleport_flag.zero();
        teleport_command.zero();

        let scheme = control_scheme % descriptor.control_schemes.max(1);
        control.set_byte(0, scheme);
        debug!(agent = name, agent_type = %descriptor.type_name, is_main, "registered agent");

        if is_main {
            if let Some(previous) = self.main.take() {
                if let Some(a) = self.agents.get_mut(&previous) {
                    a.is_main = false;
                }
            }
            self.main = Some(name.to_string());
        }
        let agent = Agent {
            name: name.to_string(),
            descriptor,
            is_main,
            control_scheme: scheme,
            action,
            teleport_flag,
            teleport_command,
            control,
            sensors: IndexMap::new(),
        };
        Ok(self.agents.entry(name.to_string()).or_insert(agent))
    }

    /// Allocate a sensor buffer and attach it to `agent`.
    pub fn add_sensor(
        &mut self,
        regions: &mut RegionManager,
        agent: &str,
        sensor: &str,
        descriptor: SensorDescriptor,
        tick_every: u32,
    ) -> Result<&Sensor, EnvError> {
        let a = self.agent_mut(agent)?;
        if a.sensors.contains_key(sensor) {
            return Err(ConfigError::DuplicateSensor {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
            }
            .into());
        }
        let buffer = regions.allocate_sim(&naming::sensor_data(agent, sensor), descriptor.spec.clone())?;
        debug!(
            agent, sensor, sensor_type = %descriptor.type_name, tick_every,
            "registered sensor"
        );
        let every = tick_every.max(1);
        let s = Sensor {
            name: sensor.to_string(),
            descriptor,
            buffer,
            every,
            count: every,
            due: false,
        };
        Ok(a.sensors.entry(sensor.to_string()).or_insert(s))
    }

    /// Detach a sensor. The caller releases its region.
    pub fn remove_sensor(&mut self, agent: &str, sensor: &str) -> Result<Sensor, ConfigError> {
        self.agent_mut(agent)?
            .sensors
            .shift_remove(sensor)
            .ok_or_else(|| ConfigError::UnknownSensor {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
            })
    }

    /// Write an action into the agent's buffer, zero-padding short ones.
    pub fn act(&mut self, agent: &str, action: &[f32]) -> Result<(), ConfigError> {
        let a = self.agent(agent)?;
        let capacity = a.action.spec().len();
        if action.len() > capacity {
            return Err(ConfigError::ActionTooLong {
                agent: agent.to_string(),
                len: action.len(),
                capacity,
            });
        }
        let mut padded = vec![0.0f32; capacity];
        padded[..action.len()].copy_from_slice(action);
        a.action.write_f32(0, &padded);
        Ok(())
    }

    /// Request a teleport on the next tick. Does nothing if both parts
    /// are `None`. The last request before a tick wins.
    pub fn teleport(
        &mut self,
        agent: &str,
        location: Option<[f32; 3]>,
        rotation: Option<[f32; 3]>,
    ) -> Result<(), ConfigError> {
        let a = self.agent(agent)?;
        let mut flag = 0;
        if let Some(loc) = location {
            a.teleport_command.write_f32(0, &loc);
            flag |= TELEPORT_LOCATION;
        }
        if let Some(rot) = rotation {
            a.teleport_command.write_f32(3, &rot);
            flag |= TELEPORT_ROTATION;
        }
        if flag != 0 {
            a.teleport_flag.set_byte(0, flag);
        }
        Ok(())
    }

    /// Overwrite the agent's full physics state on the next tick.
    pub fn set_physics_state(
        &mut self,
        agent: &str,
        location: [f32; 3],
        rotation: [f32; 3],
        velocity: [f32; 3],
        angular_velocity: [f32; 3],
    ) -> Result<(), ConfigError> {
        let a = self.agent(agent)?;
        let mut state = [0.0f32; TELEPORT_COMMAND_LEN];
        for (i, part) in [location, rotation, velocity, angular_velocity].iter().enumerate() {
            state[i * 3..i * 3 + 3].copy_from_slice(part);
        }
        a.teleport_command.write_f32(0, &state);
        a.teleport_flag.set_byte(0, TELEPORT_PHYSICS_STATE);
        Ok(())
    }

    /// Select a control scheme, modulo the agent's scheme count.
    /// Returns the stored scheme.
    pub fn set_control_scheme(&mut self, agent: &str, scheme: u8) -> Result<u8, ConfigError> {
        let a = self.agent_mut(agent)?;
        let stored = scheme % a.descriptor.control_schemes.max(1);
        a.control.set_byte(0, stored);
        a.control_scheme = stored;
        Ok(stored)
    }

    /// Zero every action buffer.
    pub fn clear_actions(&mut self) {
        for a in self.agents.values() {
            a.action.zero();
        }
    }

    /// Clear teleport flags the simulator has consumed.
    pub fn after_tick(&mut self) {
        for a in self.agents.values() {
            if a.teleport_flag.byte(0).is_some_and(|f| f != 0) {
                a.teleport_flag.set_byte(0, 0);
            }
        }
    }

    /// Count one tick on every sensor.
    pub fn advance(&mut self) {
        for s in self.agents.values_mut().flat_map(|a| a.sensors.values_mut()) {
            s.advance();
        }
    }

    /// Forget one agent. The caller releases its regions.
    pub fn remove_agent(&mut self, name: &str) -> Option<Agent> {
        let agent = self.agents.shift_remove(name)?;
        if self.main.as_deref() == Some(name) {
            self.main = None;
        }
        Some(agent)
    }

    /// Hand the main role back to `name`, e.g. after the agent that
    /// took it was removed again.
    pub(crate) fn restore_main(&mut self, name: Option<&str>) {
        if let Some(current) = self.main.take() {
            if let Some(a) = self.agents.get_mut(&current) {
                a.is_main = false;
            }
        }
        if let Some(a) = name.and_then(|n| self.agents.get_mut(n)) {
            a.is_main = true;
            self.main = Some(a.name.clone());
        }
    }

    /// Forget every agent.
    pub fn clear(&mut self) {
        self.agents.clear();
        self.main = None;
    }

    /// Whether any sensor is slow to initialize.
    pub fn has_slow_init(&self) -> bool {
        self.agents
            .values()
            .flat_map(|a| a.sensors.values())
            .any(|s| s.descriptor.slow_init)
    }

    /// Look up an agent.
    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    /// Look up an agent, failing with [`ConfigError::UnknownAgent`].
    pub fn agent(&self, name: &str) -> Result<&Agent, ConfigError> {
        self.agents.get(name).ok_or_else(|| ConfigError::UnknownAgent {
            name: name.to_string(),
        })
    }

    pub(crate) fn agent_mut(&mut self, name: &str) -> Result<&mut Agent, ConfigError> {
        self.agents
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownAgent {
                name: name.to_string(),
            })
    }

    /// Look up a sensor, failing with an unknown-agent or
    /// unknown-sensor error.
    pub fn sensor(&self, agent: &str, sensor: &str) -> Result<&Sensor, ConfigError> {
        self.agent(agent)?
            .sensors
            .get(sensor)
            .ok_or_else(|| ConfigError::UnknownSensor {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
            })
    }

    pub(crate) fn sensor_mut(&mut self, agent: &str, sensor: &str) -> Result<&mut Sensor, ConfigError> {
        self.agent_mut(agent)?
            .sensors
            .get_mut(sensor)
            .ok_or_else(|| ConfigError::UnknownSensor {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
            })
    }

    /// The main agent.
    pub fn main(&self) -> Option<&Agent> {
        self.main.as_deref().and_then(|n| self.agents.get(n))
    }

    /// Agents in spawn order.
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// `true` if no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Human-readable summary of agents, schemes and sensors.
    pub fn info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Agents: {}", self.agents.len());
        for a in self.agents.values() {
            let _ = writeln!(
                out,
                "  {}{} ({}): control scheme {} of {}, action length {}",
                a.name,
                if a.is_main { " [main]" } else { "" },
                a.descriptor.type_name,
                a.control_scheme,
                a.descriptor.control_schemes,
                a.descriptor.action_len,
            );
            for s in a.sensors.values() {
                let role = match s.descriptor.role {
                    SensorRole::Plain => "",
                    SensorRole::AcousticBeacon => " [beacon]",
                    SensorRole::OpticalModem => " [modem]",
                    SensorRole::Task => " [task]",
                };
                let _ = writeln!(
                    out,
                    "    {} ({}){}: {}, every {} tick(s)",
                    s.name, s.descriptor.type_name, role, s.descriptor.spec, s.every,
                );
            }
        }
        out
    }
}
