//! An in-process simulator speaking the shared-memory wire contract.
//!
//! [`FakeSimulator`] maps the same region files as the client through a
//! non-owning [`RegionManager`] and does one simulation step per
//! release:
//!
//! 1. parse `command_buffer` when `command_bool` is raised,
//! 2. honour `RESET`,
//! 3. apply teleports, then move each agent by its action,
//! 4. write every sensor buffer.
//!
//! Physics is deliberately trivial: an agent's location is the running
//! sum of the first three action components. Sensors read back the
//! agent's pose; other float sensors carry the step number.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{
    AgentCatalog, BufferSpec, ElementType, Handshake, HandshakeError, SensorCatalog, SensorRole,
};
use tether_engine::registry::{TELEPORT_COMMAND_LEN, TELEPORT_PHYSICS_STATE};
use tether_engine::{channel_pair, ChannelHandshake, EnvironmentConfig};
use tether_shm::{naming, ClientBuffer, RegionManager, ShmError, SimBuffer};
use tether_wire::{decode, WireCommand};
use tracing::{debug, trace, warn};

/// Speed of sound used for acoustic propagation, in metres per second.
pub const SOUND_SPEED: f64 = 1500.0;

/// Default optical modem range in metres.
pub const OPTICAL_RANGE: f32 = 50.0;

struct FakeSensor {
    sensor_type: String,
    role: SensorRole,
    buffer: ClientBuffer,
}

struct FakeAgent {
    location: [f32; 3],
    rotation: [f32; 3],
    action: SimBuffer,
    teleport_flag: SimBuffer,
    teleport_command: SimBuffer,
    control_scheme: SimBuffer,
    sensors: IndexMap<String, FakeSensor>,
}

struct InFlight {
    due: u64,
    agent: String,
    sensor: String,
    signal: [f32; 4],
}

struct SimState {
    regions: RegionManager,
    sensors: SensorCatalog,
    agent_types: AgentCatalog,
    ticks_per_sec: u32,
    command_buffer: SimBuffer,
    command_bool: SimBuffer,
    reset: SimBuffer,
    agents: IndexMap<String, FakeAgent>,
    acoustic: Vec<InFlight>,
    optical_gates: HashSet<(String, String)>,
    optical_range: f32,
    commands: Vec<WireCommand>,
    decode_errors: usize,
    steps: u64,
    resets: u64,
    stalled: bool,
    nan_fill: HashSet<(String, String)>,
    task: [f32; 2],
}

impl SimState {
    fn step(&mut self) {
        let current = self.steps + 1;
        self.optical_gates.clear();
        if self.command_bool.byte(0).is_some_and(|b| b != 0) {
            match decode(self.command_buffer.as_bytes()) {
                Ok(commands) => {
                    for cmd in commands {
                        self.apply(&cmd, current);
                        self.commands.push(cmd);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "fake simulator could not parse commands");
                    self.decode_errors += 1;
                }
            }
        }
        if self.reset.byte(0).is_some_and(|b| b != 0) {
            self.agents.clear();
            self.acoustic.clear();
            self.regions.release_unused();
            self.resets += 1;
            debug!(resets = self.resets, "fake simulator reset");
        }

        for agent in self.agents.values_mut() {
            agent.apply_teleport();
            if let Some(action) = agent.action.as_f32() {
                for (loc, delta) in agent.location.iter_mut().zip(action.iter().take(3)) {
                    *loc += *delta;
                }
            }
        }
        self.write_sensors(current);
        self.steps = current;
        trace!(step = current, "fake simulator step");
    }

    fn apply(&mut self, cmd: &WireCommand, current: u64) {
        let result = match cmd.kind.as_str() {
            "SpawnAgent" => self.spawn_agent(cmd),
            "AddSensor" => self.add_sensor(cmd),
            "RemoveSensor" => {
                if let (Some(agent), Some(sensor)) = (cmd.text(0), cmd.text(1)) {
                    if let Some(a) = self.agents.get_mut(agent) {
                        a.sensors.shift_remove(sensor);
                    }
                    self.regions.release(&naming::sensor_data(agent, sensor));
                }
                Ok(())
            }
            "SendAcousticMessage" => {
                self.send_acoustic(cmd, current);
                Ok(())
            }
            "SendOpticalMessage" => {
                self.send_optical(cmd);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(command = %cmd.kind, error = %e, "fake simulator rejected command");
        }
    }

    fn spawn_agent(&mut self, cmd: &WireCommand) -> Result<(), ShmError> {
        let (Some(location), Some(rotation), Some(agent_type), Some(name)) =
            (cmd.vec3(0), cmd.vec3(3), cmd.text(6), cmd.text(7))
        else {
            return Ok(());
        };
        let Ok(descriptor) = self.agent_types.resolve(agent_type) else {
            return Ok(());
        };
        let r = &mut self.regions;
        let agent = FakeAgent {
            location: location.map(|v| v as f32),
            rotation: rotation.map(|v| v as f32),
            action: r.allocate_sim(
                &naming::action(name),
                BufferSpec::vector(descriptor.action_len.max(1), ElementType::F32),
            )?,
            teleport_flag: r.allocate_sim(
                &naming::teleport_flag(name),
                BufferSpec::vector(1, ElementType::U8),
            )?,
            teleport_command: r.allocate_sim(
                &naming::teleport_command(name),
                BufferSpec::vector(TELEPORT_COMMAND_LEN, ElementType::F32),
            )?,
            control_scheme: r.allocate_sim(
                &naming::control_scheme(name),
                BufferSpec::vector(1, ElementType::U8),
            )?,
            sensors: IndexMap::new(),
        };
        debug!(agent = name, agent_type, "fake simulator spawned agent");
        self.agents.insert(name.to_string(), agent);
        Ok(())
    }

    fn add_sensor(&mut self, cmd: &WireCommand) -> Result<(), ShmError> {
        let (Some(agent), Some(sensor), Some(sensor_type), Some(config)) =
            (cmd.text(0), cmd.text(1), cmd.text(2), cmd.text(3))
        else {
            return Ok(());
        };
        let config: Value = serde_json::from_str(config).unwrap_or(Value::Null);
        let Ok(descriptor) = self.sensors.resolve(sensor_type, &config) else {
            return Ok(());
        };
        if !self.agents.contains_key(agent) {
            return Ok(());
        }
        let buffer = self
            .regions
            .allocate_client(&naming::sensor_data(agent, sensor), descriptor.spec)?;
        if let Some(a) = self.agents.get_mut(agent) {
            a.sensors.insert(
                sensor.to_string(),
                FakeSensor {
                    sensor_type: sensor_type.to_string(),
                    role: descriptor.role,
                    buffer,
                },
            );
        }
        Ok(())
    }

    fn endpoints(&self, cmd: &WireCommand) -> Option<([f32; 3], String, String, [f32; 3])> {
        let from = self.agents.get(cmd.text(0)?)?;
        let (to_agent, to_sensor) = (cmd.text(2)?, cmd.text(3)?);
        let to = self.agents.get(to_agent)?;
        to.sensors.get(to_sensor)?;
        Some((from.location, to_agent.to_string(), to_sensor.to_string(), to.location))
    }

    fn send_acoustic(&mut self, cmd: &WireCommand, current: u64) {
        let Some((from, agent, sensor, to)) = self.endpoints(cmd) else {
            return;
        };
        let d = [to[0] - from[0], to[1] - from[1], to[2] - from[2]];
        let range = distance(from, to);
        let delay = ((f64::from(range) * f64::from(self.ticks_per_sec) / SOUND_SPEED).round() as u64).max(1);
        let horizontal = (d[0] * d[0] + d[1] * d[1]).sqrt();
        let signal = [
            d[1].atan2(d[0]).to_degrees(),
            d[2].atan2(horizontal).to_degrees(),
            range,
            -from[2],
        ];
        self.acoustic.push(InFlight {
            due: current + delay,
            agent,
            sensor,
            signal,
        });
    }

    fn send_optical(&mut self, cmd: &WireCommand) {
        let Some((from, agent, sensor, to)) = self.endpoints(cmd) else {
            return;
        };
        if distance(from, to) <= self.optical_range {
            self.optical_gates.insert((agent, sensor));
        }
    }

    fn write_sensors(&mut self, current: u64) {
        let arrivals = {
            let (due, later): (Vec<InFlight>, Vec<InFlight>) = std::mem::take(&mut self.acoustic)
                .into_iter()
                .partition(|m| m.due == current);
            self.acoustic = later;
            due
        };

        for (agent_name, agent) in &self.agents {
            for (sensor_name, sensor) in &agent.sensors {
                let key = (agent_name.clone(), sensor_name.clone());
                let buffer = &sensor.buffer;
                match sensor.role {
                    SensorRole::AcousticBeacon => {
                        let signal = arrivals
                            .iter()
                            .find(|m| &m.agent == agent_name && &m.sensor == sensor_name)
                            .map_or([f32::NAN; 4], |m| m.signal);
                        buffer.write_f32(0, &signal);
                    }
                    SensorRole::OpticalModem => {
                        buffer.set_flag(0, self.optical_gates.contains(&key));
                    }
                    SensorRole::Task => {
                        buffer.write_f32(0, &self.task);
                    }
                    SensorRole::Plain => match sensor.sensor_type.as_str() {
                        "LocationSensor" => {
                            buffer.write_f32(0, &agent.location);
                        }
                        "RotationSensor" => {
                            buffer.write_f32(0, &agent.rotation);
                        }
                        _ => fill(buffer, current),
                    },
                }
                if self.nan_fill.contains(&key) && buffer.spec().element == ElementType::F32 {
                    buffer.write_f32(0, &vec![f32::NAN; buffer.spec().len()]);
                }
            }
        }
    }
}

impl FakeAgent {
    fn apply_teleport(&mut self) {
        let flag = self.teleport_flag.byte(0).unwrap_or(0);
        if flag == 0 {
            return;
        }
        let Some(cmd) = self.teleport_command.to_f32_vec() else {
            return;
        };
        if flag == TELEPORT_PHYSICS_STATE || flag & 1 != 0 {
            self.location.copy_from_slice(&cmd[0..3]);
        }
        if flag == TELEPORT_PHYSICS_STATE || flag & 2 != 0 {
            self.rotation.copy_from_slice(&cmd[3..6]);
        }
    }
}

fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn fill(buffer: &ClientBuffer, step: u64) {
    let spec = buffer.spec();
    match spec.element {
        ElementType::F32 => {
            buffer.write_f32(0, &vec![step as f32; spec.len()]);
        }
        _ => {
            buffer.write_bytes(0, &vec![step as u8; spec.byte_len()]);
        }
    }
}

// ── FakeSimulator ─────────────────────────────────────────────────

/// The simulator side of one environment.
///
/// Used directly as the environment's [`Handshake`], each release runs
/// one step inline. [`spawn`](Self::spawn) runs it on a thread instead.
pub struct FakeSimulator {
    state: Arc<Mutex<SimState>>,
    ready: bool,
}

impl FakeSimulator {
    /// Attach to the regions `config` will use. The simulator is ready
    /// at once, so the client's initial synchronize succeeds.
    pub fn new(config: &EnvironmentConfig) -> Result<Self, ShmError> {
        let mut regions = RegionManager::attach(config.shm.clone(), config.uuid.clone())?;
        let command_buffer = regions.allocate_sim(
            naming::COMMAND_BUFFER,
            BufferSpec::vector(config.command_capacity, ElementType::I8),
        )?;
        let command_bool =
            regions.allocate_sim(naming::COMMAND_BOOL, BufferSpec::vector(1, ElementType::Bool))?;
        let reset = regions.allocate_sim(naming::RESET, BufferSpec::vector(1, ElementType::Bool))?;
        let state = SimState {
            regions,
            sensors: SensorCatalog::builtin(),
            agent_types: AgentCatalog::builtin(),
            ticks_per_sec: config.ticks_per_sec,
            command_buffer,
            command_bool,
            reset,
            agents: IndexMap::new(),
            acoustic: Vec::new(),
            optical_gates: HashSet::new(),
            optical_range: OPTICAL_RANGE,
            commands: Vec::new(),
            decode_errors: 0,
            steps: 0,
            resets: 0,
            stalled: false,
            nan_fill: HashSet::new(),
            task: [0.0, 0.0],
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            ready: true,
        })
    }

    /// A handle for assertions and fault injection.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Run the simulator on its own thread, paired through channels.
    /// The thread exits once the client side is dropped.
    pub fn spawn(self) -> (ChannelHandshake, JoinHandle<u64>) {
        let (client, peer) = channel_pair();
        let state = self.state;
        let thread = std::thread::spawn(move || {
            if !peer.signal() {
                return 0;
            }
            while peer.wait_release() {
                let mut s = state.lock();
                if s.stalled {
                    continue;
                }
                s.step();
                drop(s);
                if !peer.signal() {
                    break;
                }
            }
            state.lock().steps
        });
        (client, thread)
    }
}

impl Handshake for FakeSimulator {
    fn release(&mut self) -> Result<(), HandshakeError> {
        let mut s = self.state.lock();
        if !s.stalled {
            s.step();
            self.ready = true;
        }
        Ok(())
    }

    fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
        if std::mem::take(&mut self.ready) {
            return Ok(());
        }
        match timeout {
            Some(timeout) => Err(HandshakeError::Timeout { timeout }),
            None => Err(HandshakeError::Disconnected),
        }
    }
}

impl std::fmt::Debug for FakeSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.lock();
        f.debug_struct("FakeSimulator")
            .field("steps", &s.steps)
            .field("agents", &s.agents.len())
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

// ── SimHandle ─────────────────────────────────────────────────────

/// Inspects and perturbs a [`FakeSimulator`] from the test.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Every command parsed so far, in order.
    pub fn commands(&self) -> Vec<WireCommand> {
        self.state.lock().commands.clone()
    }

    /// Wire type names of every command parsed so far.
    pub fn command_kinds(&self) -> Vec<String> {
        self.state.lock().commands.iter().map(|c| c.kind.clone()).collect()
    }

    /// Command documents that failed to parse.
    pub fn decode_errors(&self) -> usize {
        self.state.lock().decode_errors
    }

    /// Spawned agents, in spawn order.
    pub fn agent_names(&self) -> Vec<String> {
        self.state.lock().agents.keys().cloned().collect()
    }

    /// Sensors attached to `agent`, in attach order.
    pub fn sensor_names(&self, agent: &str) -> Vec<String> {
        self.state
            .lock()
            .agents
            .get(agent)
            .map(|a| a.sensors.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn agent_location(&self, agent: &str) -> Option<[f32; 3]> {
        self.state.lock().agents.get(agent).map(|a| a.location)
    }

    pub fn agent_rotation(&self, agent: &str) -> Option<[f32; 3]> {
        self.state.lock().agents.get(agent).map(|a| a.rotation)
    }

    /// The control scheme byte the client wrote for `agent`.
    pub fn control_scheme(&self, agent: &str) -> Option<u8> {
        self.state
            .lock()
            .agents
            .get(agent)
            .and_then(|a| a.control_scheme.byte(0))
    }

    /// Steps run.
    pub fn steps(&self) -> u64 {
        self.state.lock().steps
    }

    /// `RESET` flags observed.
    pub fn reset_count(&self) -> u64 {
        self.state.lock().resets
    }

    /// Stop stepping: every following acquire fails.
    pub fn stall(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Overwrite a float sensor with NaN on every step.
    pub fn nan_fill(&self, agent: &str, sensor: &str, enabled: bool) {
        let key = (agent.to_string(), sensor.to_string());
        let mut s = self.state.lock();
        if enabled {
            s.nan_fill.insert(key);
        } else {
            s.nan_fill.remove(&key);
        }
    }

    pub fn set_optical_range(&self, range: f32) {
        self.state.lock().optical_range = range;
    }

    /// Value written into every task sensor: `[reward, terminal]`.
    pub fn set_task(&self, reward: f32, terminal: bool) {
        self.state.lock().task = [reward, if terminal { 1.0 } else { 0.0 }];
    }

    /// Acoustic signals scheduled but not yet written.
    pub fn acoustic_in_flight(&self) -> usize {
        self.state.lock().acoustic.len()
    }
}

impl std::fmt::Debug for SimHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHandle").finish_non_exhaustive()
    }
}
