//! The environment orchestrator.
//!
//! [`Environment`] composes the region manager, command center, tick
//! engine, agent registry and messaging registry behind the public
//! step/tick/act API. Its lifecycle is
//!
//! ```text
//!   launch / attach / with_handshake ──▶ Ready ──reset──▶ Active ⟲ reset
//!                                          │                 │
//!                                          └──── close / fatal error ──▶ TornDown
//! ```
//!
//! `step` and `tick` need a prior `reset`. After [`close`](Environment::close)
//! or any error for which [`EnvError::is_fatal`] holds, every call
//! returns [`EnvError::TornDown`].

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tether_comms::{
    CommsError, DeviceEndpoint, DeviceStatus, MessageType, MessagingRegistry, ResolveReport,
    SendOutcome,
};
use tether_core::{
    AgentCatalog, AgentDescriptor, BufferSpec, CommandPayload, DebugDrawKind, DeviceId,
    ElementType, Handshake, Material, PropKind, Recipient, SensorCatalog, SensorDescriptor,
    SensorRole, TickId,
};
use tether_shm::{cleanup, naming, ClientBuffer, RegionManager, SimBuffer};
use tether_wire::CommandCenter;
use tracing::{debug, error, info, warn};

use crate::config::EnvironmentConfig;
use crate::error::{ConfigError, EnvError};
use crate::launcher::SimulatorProcess;
use crate::registry::{self, AgentRegistry};
use crate::scenario::{AgentConfig, Scenario, SensorConfig};
use crate::state::{self, Deliveries, StateSnapshot};
use crate::tick::{TickEngine, TickReport, TimeoutPolicy};

/// Ticks run with the reset flag visible before agents are respawned.
pub const RESET_TICKS: u32 = 3;

/// Color used by the debug-draw helpers when none is given.
pub const DEFAULT_DRAW_COLOR: [u8; 3] = [255, 0, 0];

/// Thickness used by the debug-draw helpers when none is given.
pub const DEFAULT_DRAW_THICKNESS: f64 = 10.0;

/// Highest render quality level.
pub const MAX_RENDER_QUALITY: u8 = 3;

/// Sensor and agent catalogs an environment resolves types against.
#[derive(Clone)]
pub struct Catalogs {
    /// Sensor types.
    pub sensors: SensorCatalog,
    /// Agent types.
    pub agents: AgentCatalog,
}

impl Default for Catalogs {
    fn default() -> Self {
        Self {
            sensors: SensorCatalog::builtin(),
            agents: AgentCatalog::builtin(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Ready,
    Active,
    TornDown,
}

/// A connection to one simulator instance.
///
/// Not `Sync`: one caller at a time. Wrap in
/// [`SharedEnvironment`](crate::SharedEnvironment) to share across threads.
pub struct Environment {
    config: EnvironmentConfig,
    scenario: Scenario,
    catalogs: Catalogs,
    regions: RegionManager,
    commands: CommandCenter,
    reset_flag: ClientBuffer,
    engine: TickEngine,
    agents: AgentRegistry,
    messaging: MessagingRegistry,
    process: Option<SimulatorProcess>,
    rng: ChaCha8Rng,
    phase: Phase,
    last_resolve: ResolveReport,
}

// Compile-time assertion: Environment must be Send so it can sit behind
// a mutex shared between threads.
const _: () = {
    fn assert_send<T: Send>() {}
    fn check() {
        assert_send::<Environment>();
    }
    let _ = check;
};

impl Environment {
    // ── Construction ──────────────────────────────────────────────

    /// Start the simulator binary and connect to it.
    #[cfg(unix)]
    pub fn launch(
        mut config: EnvironmentConfig,
        scenario: Scenario,
        mut launch: crate::config::LaunchConfig,
    ) -> Result<Self, EnvError> {
        config.apply_scenario(&scenario);
        launch.apply_scenario(&scenario);
        config.validate()?;
        launch.validate()?;
        let catalogs = Catalogs::default();
        scenario.validate(&catalogs.sensors, &catalogs.agents)?;
        if config.install_exit_hook {
            cleanup::install_exit_hook();
        }

        let process = SimulatorProcess::launch(&config, &launch, &scenario.world)?;
        let handshake = crate::handshake::SemaphoreHandshake::open(&config.uuid)?.unlink_on_drop();
        let policy = TimeoutPolicy::from_config(&config.timeouts);
        Self::build(config, scenario, catalogs, Box::new(handshake), policy, Some(process))
    }

    /// Connect to a simulator that is already running with
    /// `config.uuid`. Ticks never time out.
    #[cfg(unix)]
    pub fn attach(mut config: EnvironmentConfig, scenario: Scenario) -> Result<Self, EnvError> {
        config.apply_scenario(&scenario);
        let handshake = crate::handshake::SemaphoreHandshake::open(&config.uuid)?;
        let policy = TimeoutPolicy::attached(&config.timeouts);
        Self::build(config, scenario, Catalogs::default(), Box::new(handshake), policy, None)
    }

    /// Connect through an arbitrary handshake, e.g. an in-process
    /// simulator.
    pub fn with_handshake(
        config: EnvironmentConfig,
        scenario: Scenario,
        handshake: impl Handshake + 'static,
    ) -> Result<Self, EnvError> {
        Self::with_catalogs(config, scenario, Catalogs::default(), handshake)
    }

    /// Like [`with_handshake`](Self::with_handshake), resolving types
    /// against custom catalogs.
    pub fn with_catalogs(
        mut config: EnvironmentConfig,
        scenario: Scenario,
        catalogs: Catalogs,
        handshake: impl Handshake + 'static,
    ) -> Result<Self, EnvError> {
        config.apply_scenario(&scenario);
        let policy = TimeoutPolicy::from_config(&config.timeouts);
        Self::build(config, scenario, catalogs, Box::new(handshake), policy, None)
    }

    fn build(
        config: EnvironmentConfig,
        scenario: Scenario,
        catalogs: Catalogs,
        handshake: Box<dyn Handshake>,
        policy: TimeoutPolicy,
        process: Option<SimulatorProcess>,
    ) -> Result<Self, EnvError> {
        config.validate()?;
        scenario.validate(&catalogs.sensors, &catalogs.agents)?;
        if config.install_exit_hook {
            cleanup::install_exit_hook();
        }

        let mut regions = RegionManager::new(config.shm.clone(), config.uuid.clone())?;
        let mut commands = CommandCenter::new(&mut regions, config.command_capacity)?;
        let reset_flag =
            regions.allocate_client(naming::RESET, BufferSpec::vector(1, ElementType::Bool))?;
        reset_flag.set_flag(0, false);

        let mut engine = TickEngine::new(handshake, policy);
        engine.synchronize()?;
        if !config.show_viewport {
            commands.enqueue(CommandPayload::RenderViewport { render: false })?;
        }
        info!(
            uuid = %config.uuid,
            world = %scenario.world,
            ticks_per_sec = config.ticks_per_sec,
            agents = scenario.agents.len(),
            "environment ready"
        );

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            messaging: MessagingRegistry::new(config.messaging.clone()),
            config,
            scenario,
            catalogs,
            regions,
            commands,
            reset_flag,
            engine,
            agents: AgentRegistry::new(),
            process,
            phase: Phase::Ready,
            last_resolve: ResolveReport::default(),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Tear down every agent, respawn the scenario's agents, and return
    /// the state after the pre-start ticks.
    pub fn reset(&mut self) -> Result<StateSnapshot<'_>, EnvError> {
        self.ensure_live()?;
        let plans = self.plan_scenario()?;
        self.reset_flag.set_flag(0, true);
        self.agents.clear_actions();
        self.messaging.clear();
        for i in 0..RESET_TICKS {
            self.tick_once()?;
            if i == 0 {
                self.reset_flag.set_flag(0, false);
            }
        }
        let discarded = self.commands.discard();
        if discarded > 0 {
            warn!(discarded, "reset before all commands were sent, discarding them");
        }

        self.agents.clear();
        self.install(plans)?;
        let released = self.regions.release_unused();
        if released > 0 {
            debug!(released, "released regions of removed agents and sensors");
        }
        self.engine.set_slow_init(self.agents.has_slow_init());
        self.phase = Phase::Active;

        for _ in 0..=self.config.pre_start_steps {
            self.tick_once()?;
        }
        info!(tick = %self.engine.current_tick(), agents = self.agents.len(), "environment reset");
        Ok(self.snapshot())
    }

    /// Apply `action` to the main agent and run `ticks` ticks. Only the
    /// final state is returned.
    pub fn step(&mut self, action: &[f32], ticks: u32) -> Result<StateSnapshot<'_>, EnvError> {
        self.ensure_active()?;
        if ticks == 0 {
            return Err(EnvError::InvalidTickCount);
        }
        let main = self
            .agents
            .main()
            .map(|a| a.name().to_string())
            .ok_or(EnvError::NoMainAgent)?;
        for _ in 0..ticks {
            self.agents.act(&main, action)?;
            self.tick_once()?;
        }
        Ok(self.snapshot())
    }

    /// Run `ticks` ticks with the actions already written. Only the
    /// final state is returned.
    pub fn tick(&mut self, ticks: u32) -> Result<StateSnapshot<'_>, EnvError> {
        self.ensure_active()?;
        if ticks == 0 {
            return Err(EnvError::InvalidTickCount);
        }
        for _ in 0..ticks {
            self.tick_once()?;
        }
        Ok(self.snapshot())
    }

    /// Kill the simulator if this environment launched it, and unlink
    /// every region and semaphore. Idempotent.
    pub fn close(&mut self) {
        if self.phase == Phase::TornDown {
            return;
        }
        self.phase = Phase::TornDown;
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.engine.close();
        self.regions.release_all();
        info!(uuid = %self.config.uuid, tick = %self.engine.current_tick(), "environment torn down");
    }

    /// Whether the environment has been torn down.
    pub fn is_torn_down(&self) -> bool {
        self.phase == Phase::TornDown
    }

    fn ensure_live(&self) -> Result<(), EnvError> {
        match self.phase {
            Phase::TornDown => Err(EnvError::TornDown),
            Phase::Ready | Phase::Active => Ok(()),
        }
    }

    fn ensure_active(&self) -> Result<(), EnvError> {
        match self.phase {
            Phase::TornDown => Err(EnvError::TornDown),
            Phase::Ready => Err(EnvError::NotReset),
            Phase::Active => Ok(()),
        }
    }

    fn tick_once(&mut self) -> Result<(), EnvError> {
        match self.tick_and_resolve() {
            Ok(report) => {
                self.last_resolve = report;
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    error!(error = %e, tick = %self.engine.current_tick(), "fatal tick failure");
                    self.close();
                }
                Err(e)
            }
        }
    }

    fn tick_and_resolve(&mut self) -> Result<ResolveReport, EnvError> {
        self.engine.execute_tick(&mut self.commands, &mut self.agents)?;
        let now = self.engine.current_tick();
        Ok(self.messaging.resolve(now, &mut self.commands)?)
    }

    fn snapshot(&mut self) -> StateSnapshot<'_> {
        let deliveries = Deliveries::take(&self.agents, &mut self.messaging);
        state::capture(
            self.engine.current_tick(),
            self.config.ticks_per_sec,
            &self.agents,
            deliveries,
            self.config.state_mode,
        )
    }

    // ── Agents and sensors ────────────────────────────────────────
    //
    // Adding agents or sensors runs in two steps. Planning resolves and
    // checks everything that can be checked without touching shared
    // state. Installing registers the plan, then queues its commands in
    // one batch; a failure while installing removes what was registered.

    /// Spawn an agent outside of a reset. It is not part of the
    /// scenario, so the next reset removes it.
    pub fn add_agent(&mut self, definition: &AgentConfig, is_main: bool) -> Result<(), EnvError> {
        self.ensure_live()?;
        let plan = self.plan_agent(definition, is_main, false, &mut Vec::new())?;
        self.install(vec![plan])
    }

    /// Attach a sensor to a live agent.
    pub fn add_sensor(&mut self, agent: &str, sensor: &SensorConfig) -> Result<(), EnvError> {
        self.ensure_live()?;
        if self.agents.agent(agent)?.sensor(sensor.name()).is_some() {
            return Err(ConfigError::DuplicateSensor {
                agent: agent.to_string(),
                sensor: sensor.name().to_string(),
            }
            .into());
        }
        let plan = self.plan_sensor(agent, sensor, false, &mut Vec::new())?;
        let name = plan.name.clone();
        if let Err(e) = self.try_install_sensor(agent, plan) {
            self.drop_sensor(agent, &name);
            return Err(e);
        }
        Ok(())
    }

    /// Detach a sensor from an agent and release its region.
    pub fn remove_sensor(&mut self, agent: &str, sensor: &str) -> Result<(), EnvError> {
        self.ensure_live()?;
        self.agents.sensor(agent, sensor)?;
        self.commands.enqueue(CommandPayload::RemoveSensor {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
        })?;
        self.drop_sensor(agent, sensor);
        Ok(())
    }

    /// Plan the scenario's agents for a reset. The registry is about to
    /// be cleared, so only clashes within the scenario count.
    fn plan_scenario(&self) -> Result<Vec<AgentPlan>, EnvError> {
        let mut claims = Vec::new();
        let mut plans: Vec<AgentPlan> = Vec::with_capacity(self.scenario.agents.len());
        for definition in &self.scenario.agents {
            if plans.iter().any(|p| p.config.name() == definition.name()) {
                return Err(ConfigError::DuplicateAgent {
                    name: definition.name().to_string(),
                }
                .into());
            }
            let is_main = self.scenario.is_main(definition.name());
            plans.push(self.plan_agent(definition, is_main, true, &mut claims)?);
        }
        Ok(plans)
    }

    /// `fresh` plans are checked against `claims` only, not against the
    /// live registries.
    fn plan_agent(
        &self,
        definition: &AgentConfig,
        is_main: bool,
        fresh: bool,
        claims: &mut Vec<DeviceClaim>,
    ) -> Result<AgentPlan, EnvError> {
        let name = definition.name();
        if !fresh && self.agents.get(name).is_some() {
            return Err(ConfigError::DuplicateAgent {
                name: name.to_string(),
            }
            .into());
        }
        let descriptor = self
            .catalogs
            .agents
            .resolve(&definition.agent_type)
            .map_err(ConfigError::from)?;
        let mut sensors: Vec<SensorPlan> = Vec::with_capacity(definition.sensors.len());
        for sensor in &definition.sensors {
            if sensors.iter().any(|s| s.name == sensor.name()) {
                return Err(ConfigError::DuplicateSensor {
                    agent: name.to_string(),
                    sensor: sensor.name().to_string(),
                }
                .into());
            }
            sensors.push(self.plan_sensor(name, sensor, fresh, claims)?);
        }
        Ok(AgentPlan {
            config: definition.clone(),
            descriptor,
            is_main,
            sensors,
        })
    }

    fn plan_sensor(
        &self,
        agent: &str,
        sensor: &SensorConfig,
        fresh: bool,
        claims: &mut Vec<DeviceClaim>,
    ) -> Result<SensorPlan, EnvError> {
        let name = sensor.name();
        let mut configuration = sensor.configuration();
        let descriptor = self
            .catalogs
            .sensors
            .resolve(&sensor.sensor_type, &configuration)
            .map_err(ConfigError::from)?;
        let every = registry::tick_every(
            agent,
            name,
            sensor.hz,
            self.config.ticks_per_sec,
            self.config.rate_policy,
        )?;
        if descriptor.capture_rate_in_config {
            if let Value::Object(map) = &mut configuration {
                map.insert("TicksPerCapture".to_string(), Value::from(every));
            }
        }

        let device = match descriptor.role {
            SensorRole::AcousticBeacon | SensorRole::OpticalModem => {
                let explicit = configuration
                    .get("id")
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok())
                    .map(DeviceId);
                if let Some(id) = explicit {
                    let endpoint = DeviceEndpoint::new(agent, name);
                    self.claim(descriptor.role, id, endpoint, fresh, claims)?;
                }
                explicit
            }
            SensorRole::Plain | SensorRole::Task => None,
        };

        let command = (!sensor.existing).then(|| CommandPayload::AddSensor {
            agent: agent.to_string(),
            sensor: name.to_string(),
            sensor_type: descriptor.type_name.clone(),
            config: configuration.to_string(),
            socket: sensor.socket.clone(),
            location: sensor.location,
            rotation: sensor.rotation,
        });
        Ok(SensorPlan {
            name: name.to_string(),
            descriptor,
            every,
            device,
            command,
        })
    }

    fn claim(
        &self,
        role: SensorRole,
        id: DeviceId,
        endpoint: DeviceEndpoint,
        fresh: bool,
        claims: &mut Vec<DeviceClaim>,
    ) -> Result<(), EnvError> {
        if let Some(taken) = claims.iter().find(|c| c.role == role && c.id == id) {
            return Err(CommsError::DuplicateDeviceId {
                kind: device_kind(role),
                id,
                agent: taken.endpoint.agent.clone(),
                sensor: taken.endpoint.sensor.clone(),
            }
            .into());
        }
        if !fresh {
            match role {
                SensorRole::AcousticBeacon => self.messaging.check_beacon_id(id)?,
                _ => self.messaging.check_modem_id(id)?,
            }
        }
        claims.push(DeviceClaim { role, id, endpoint });
        Ok(())
    }

    /// Register planned agents and queue their commands. On failure
    /// every agent of the batch is forgotten again and the previous main
    /// agent keeps its role.
    fn install(&mut self, plans: Vec<AgentPlan>) -> Result<(), EnvError> {
        let previous_main = self.agents.main().map(|a| a.name().to_string());
        let mut installed = Vec::with_capacity(plans.len());
        if let Err(e) = self.try_install(plans, &mut installed) {
            for name in &installed {
                self.forget_agent(name);
            }
            self.agents.restore_main(previous_main.as_deref());
            return Err(e);
        }
        Ok(())
    }

    fn try_install(
        &mut self,
        plans: Vec<AgentPlan>,
        installed: &mut Vec<String>,
    ) -> Result<(), EnvError> {
        let mut commands = Vec::new();
        let mut devices = Vec::new();
        for plan in plans {
            let AgentPlan {
                config,
                descriptor,
                is_main,
                sensors,
            } = plan;
            let name = config.name();
            let location = jitter(&mut self.rng, config.location, config.location_randomization);
            let rotation = jitter(&mut self.rng, config.rotation, config.rotation_randomization);
            if !config.existing {
                commands.push(CommandPayload::SpawnAgent {
                    location,
                    rotation,
                    agent_type: descriptor.type_name.clone(),
                    name: name.to_string(),
                    is_main,
                });
            }
            self.agents.add_agent(
                &mut self.regions,
                name,
                descriptor,
                config.control_scheme,
                is_main,
            )?;
            installed.push(name.to_string());
            for sensor in sensors {
                self.register_sensor(name, sensor, &mut commands, &mut devices)?;
            }
            debug!(agent = name, ?location, ?rotation, existing = config.existing, "spawned agent");
        }
        self.register_devices(devices)?;
        Ok(self.commands.enqueue_all(commands)?)
    }

    fn try_install_sensor(&mut self, agent: &str, plan: SensorPlan) -> Result<(), EnvError> {
        let mut commands = Vec::new();
        let mut devices = Vec::new();
        self.register_sensor(agent, plan, &mut commands, &mut devices)?;
        self.register_devices(devices)?;
        Ok(self.commands.enqueue_all(commands)?)
    }

    fn register_sensor(
        &mut self,
        agent: &str,
        plan: SensorPlan,
        commands: &mut Vec<CommandPayload>,
        devices: &mut Vec<PendingDevice>,
    ) -> Result<(), EnvError> {
        let role = plan.descriptor.role;
        let buffer = self
            .agents
            .add_sensor(&mut self.regions, agent, &plan.name, plan.descriptor, plan.every)?
            .buffer()
            .clone();
        if let Some(command) = plan.command {
            commands.push(command);
        }
        if matches!(role, SensorRole::AcousticBeacon | SensorRole::OpticalModem) {
            devices.push(PendingDevice {
                role,
                id: plan.device,
                endpoint: DeviceEndpoint::new(agent, plan.name),
                buffer,
            });
        }
        Ok(())
    }

    /// Explicit ids are registered first so an automatic id never takes
    /// one that a later device of the same batch asked for.
    fn register_devices(&mut self, mut devices: Vec<PendingDevice>) -> Result<(), EnvError> {
        devices.sort_by_key(|d| d.id.is_none());
        for d in devices {
            let PendingDevice {
                role,
                id,
                endpoint,
                buffer,
            } = d;
            match role {
                SensorRole::AcousticBeacon => self.messaging.add_beacon(id, endpoint, buffer)?,
                _ => self.messaging.add_modem(id, endpoint, buffer)?,
            };
        }
        Ok(())
    }

    /// Unregister a sensor and release its region. Does nothing for a
    /// sensor that is not registered.
    fn drop_sensor(&mut self, agent: &str, sensor: &str) {
        if self.agents.remove_sensor(agent, sensor).is_ok() {
            self.messaging.remove_endpoint(&DeviceEndpoint::new(agent, sensor));
            self.regions.release(&naming::sensor_data(agent, sensor));
        }
    }

    /// Unregister an agent with its sensors and release their regions.
    fn forget_agent(&mut self, name: &str) {
        let Some(agent) = self.agents.remove_agent(name) else {
            return;
        };
        for sensor in agent.sensors() {
            self.messaging.remove_endpoint(&DeviceEndpoint::new(name, sensor.name()));
        }
        let regions = agent.region_names();
        drop(agent);
        for region in &regions {
            self.regions.release(region);
        }
        debug!(agent = name, "forgot agent");
    }

    /// Rotate an attached sensor relative to its socket.
    pub fn rotate_sensor(
        &mut self,
        agent: &str,
        sensor: &str,
        rotation: [f64; 3],
    ) -> Result<(), EnvError> {
        self.ensure_live()?;
        self.agents.sensor(agent, sensor)?;
        self.commands.enqueue(CommandPayload::RotateSensor {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
            rotation,
        })?;
        Ok(())
    }

    /// Change how many ticks an RGB camera waits between captures. The
    /// camera's publication period follows.
    pub fn set_ticks_per_capture(
        &mut self,
        agent: &str,
        sensor: &str,
        ticks_per_capture: u32,
    ) -> Result<(), EnvError> {
        self.ensure_live()?;
        let s = self.agents.sensor(agent, sensor)?;
        if s.descriptor().type_name != "RGBCamera" {
            return Err(ConfigError::NotACamera {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
                sensor_type: s.descriptor().type_name.clone(),
            }
            .into());
        }
        if ticks_per_capture == 0 {
            return Err(ConfigError::InvalidCaptureRate {
                agent: agent.to_string(),
                sensor: sensor.to_string(),
            }
            .into());
        }
        self.commands.enqueue(CommandPayload::RgbCameraRate {
            agent: agent.to_string(),
            sensor: sensor.to_string(),
            ticks_per_capture,
        })?;
        self.agents
            .sensor_mut(agent, sensor)?
            .set_tick_every(ticks_per_capture);
        Ok(())
    }

    // ── Agent control ─────────────────────────────────────────────

    /// Write an action for `agent`. It applies on every tick until
    /// replaced.
    pub fn act(&mut self, agent: &str, action: &[f32]) -> Result<(), EnvError> {
        self.ensure_live()?;
        Ok(self.agents.act(agent, action)?)
    }

    /// Move and/or turn an agent on the next tick.
    pub fn teleport(
        &mut self,
        agent: &str,
        location: Option<[f32; 3]>,
        rotation: Option<[f32; 3]>,
    ) -> Result<(), EnvError> {
        self.ensure_live()?;
        Ok(self.agents.teleport(agent, location, rotation)?)
    }

    /// Overwrite an agent's pose and velocities on the next tick.
    pub fn set_physics_state(
        &mut self,
        agent: &str,
        location: [f32; 3],
        rotation: [f32; 3],
        velocity: [f32; 3],
        angular_velocity: [f32; 3],
    ) -> Result<(), EnvError> {
        self.ensure_live()?;
        Ok(self
            .agents
            .set_physics_state(agent, location, rotation, velocity, angular_velocity)?)
    }

    /// Select an agent's control scheme. Returns the stored scheme
    /// (modulo the agent's scheme count).
    pub fn set_control_scheme(&mut self, agent: &str, scheme: u8) -> Result<u8, EnvError> {
        self.ensure_live()?;
        Ok(self.agents.set_control_scheme(agent, scheme)?)
    }

    // ── World and viewport ────────────────────────────────────────

    fn enqueue(&mut self, payload: CommandPayload) -> Result<(), EnvError> {
        self.ensure_live()?;
        Ok(self.commands.enqueue(payload)?)
    }

    fn draw(
        &mut self,
        kind: DebugDrawKind,
        start: [f64; 3],
        end: [f64; 3],
        color: Option<[u8; 3]>,
        thickness: Option<f64>,
    ) -> Result<(), EnvError> {
        self.enqueue(CommandPayload::DebugDraw {
            kind,
            start,
            end,
            color: color.unwrap_or(DEFAULT_DRAW_COLOR),
            thickness: thickness.unwrap_or(DEFAULT_DRAW_THICKNESS),
        })
    }

    /// Draw a debug line for one frame.
    pub fn draw_line(
        &mut self,
        start: [f64; 3],
        end: [f64; 3],
        color: Option<[u8; 3]>,
        thickness: Option<f64>,
    ) -> Result<(), EnvError> {
        self.draw(DebugDrawKind::Line, start, end, color, thickness)
    }

    /// Draw a debug arrow for one frame.
    pub fn draw_arrow(
        &mut self,
        start: [f64; 3],
        end: [f64; 3],
        color: Option<[u8; 3]>,
        thickness: Option<f64>,
    ) -> Result<(), EnvError> {
        self.draw(DebugDrawKind::Arrow, start, end, color, thickness)
    }

    /// Draw a debug box around `center` with half-size `extent`.
    pub fn draw_box(
        &mut self,
        center: [f64; 3],
        extent: [f64; 3],
        color: Option<[u8; 3]>,
        thickness: Option<f64>,
    ) -> Result<(), EnvError> {
        self.draw(DebugDrawKind::Box, center, extent, color, thickness)
    }

    /// Draw a debug point.
    pub fn draw_point(
        &mut self,
        location: [f64; 3],
        color: Option<[u8; 3]>,
        thickness: Option<f64>,
    ) -> Result<(), EnvError> {
        self.draw(DebugDrawKind::Point, location, [0.0; 3], color, thickness)
    }

    /// Move the viewport camera.
    pub fn move_viewport(&mut self, location: [f64; 3], rotation: [f64; 3]) -> Result<(), EnvError> {
        self.enqueue(CommandPayload::TeleportCamera { location, rotation })
    }

    /// Turn viewport rendering on or off.
    pub fn should_render_viewport(&mut self, render: bool) -> Result<(), EnvError> {
        self.enqueue(CommandPayload::RenderViewport { render })
    }

    /// Set render quality, 0 to [`MAX_RENDER_QUALITY`].
    pub fn set_render_quality(&mut self, quality: u8) -> Result<(), EnvError> {
        if quality > MAX_RENDER_QUALITY {
            return Err(ConfigError::InvalidRenderQuality { quality }.into());
        }
        self.enqueue(CommandPayload::RenderQuality { quality })
    }

    /// Send a world-specific command.
    pub fn send_world_command(
        &mut self,
        name: &str,
        numbers: &[f64],
        strings: &[&str],
    ) -> Result<(), EnvError> {
        self.enqueue(CommandPayload::Custom {
            name: name.to_string(),
            numbers: numbers.to_vec(),
            strings: strings.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Spawn a primitive prop. Props do not survive a reset.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_prop(
        &mut self,
        kind: PropKind,
        location: [f64; 3],
        rotation: [f64; 3],
        scale: [f64; 3],
        sim_physics: bool,
        material: Material,
        tag: &str,
    ) -> Result<(), EnvError> {
        self.enqueue(CommandPayload::spawn_prop(
            kind,
            location,
            rotation,
            scale,
            sim_physics,
            material,
            tag,
        ))
    }

    // ── Messaging ─────────────────────────────────────────────────

    /// Start an acoustic transmission from beacon `from`.
    pub fn send_acoustic_message(
        &mut self,
        from: DeviceId,
        to: impl Into<Recipient>,
        kind: MessageType,
        data: Option<Value>,
    ) -> Result<SendOutcome, EnvError> {
        self.ensure_live()?;
        let now = self.engine.current_tick();
        Ok(self
            .messaging
            .send_acoustic(from, to.into(), kind, data, now, &mut self.commands)?)
    }

    /// Start an optical transmission from modem `from`.
    pub fn send_optical_message(
        &mut self,
        from: DeviceId,
        to: impl Into<Recipient>,
        data: Option<Value>,
    ) -> Result<SendOutcome, EnvError> {
        self.ensure_live()?;
        let now = self.engine.current_tick();
        Ok(self
            .messaging
            .send_optical(from, to.into(), data, now, &mut self.commands)?)
    }

    /// Registered beacon ids.
    pub fn beacon_ids(&self) -> Vec<DeviceId> {
        self.messaging.beacon_ids()
    }

    /// Registered modem ids.
    pub fn modem_ids(&self) -> Vec<DeviceId> {
        self.messaging.modem_ids()
    }

    /// Transmit status of beacon `id`.
    pub fn beacon_status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.messaging.beacon_status(id)
    }

    /// Transmit status of modem `id`.
    pub fn modem_status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.messaging.modem_status(id)
    }

    /// The messaging registry.
    pub fn messaging(&self) -> &MessagingRegistry {
        &self.messaging
    }

    // ── Introspection ─────────────────────────────────────────────

    /// Human-readable summary of the world and its agents.
    pub fn info(&self) -> String {
        let mut out = format!(
            "World: {} ({})\nTick: {} at {} ticks/s\nMain agent: {}\n",
            self.scenario.world,
            self.scenario.name,
            self.engine.current_tick(),
            self.config.ticks_per_sec,
            self.agents.main().map_or("none", |a| a.name()),
        );
        out.push_str(&self.agents.info());
        out
    }

    /// The agent registry.
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The effective configuration (scenario overrides applied).
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The loaded scenario.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Ticks completed since construction.
    pub fn current_tick(&self) -> TickId {
        self.engine.current_tick()
    }

    /// Timing of the most recent tick.
    pub fn last_report(&self) -> &TickReport {
        self.engine.last_report()
    }

    /// Messaging counters from the most recent tick.
    pub fn last_resolve(&self) -> &ResolveReport {
        &self.last_resolve
    }

    /// Commands queued for the next tick.
    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    /// Child process id, when this environment launched the simulator.
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().map(SimulatorProcess::id)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("uuid", &self.config.uuid)
            .field("world", &self.scenario.world)
            .field("phase", &self.phase)
            .field("tick", &self.engine.current_tick())
            .field("agents", &self.agents.len())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// `base` plus a uniform offset in `±half` per axis.
/// An agent whose definition resolved and passed every check.
struct AgentPlan {
    config: AgentConfig,
    descriptor: AgentDescriptor,
    is_main: bool,
    sensors: Vec<SensorPlan>,
}

/// A sensor whose definition resolved and passed every check.
struct SensorPlan {
    name: String,
    descriptor: SensorDescriptor,
    every: u32,
    device: Option<DeviceId>,
    command: Option<CommandPayload>,
}

/// An explicit device id taken by a plan that is not installed yet.
struct DeviceClaim {
    role: SensorRole,
    id: DeviceId,
    endpoint: DeviceEndpoint,
}

/// A beacon or modem waiting for its id.
struct PendingDevice {
    role: SensorRole,
    id: Option<DeviceId>,
    endpoint: DeviceEndpoint,
    buffer: SimBuffer,
}

fn device_kind(role: SensorRole) -> &'static str {
    match role {
        SensorRole::AcousticBeacon => "beacon",
        _ => "modem",
    }
}

fn jitter(rng: &mut ChaCha8Rng, base: [f64; 3], half: [f64; 3]) -> [f64; 3] {
    std::array::from_fn(|i| {
        if half[i] > 0.0 {
            base[i] + rng.gen_range(-half[i]..=half[i])
        } else {
            base[i]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded_and_seeded() {
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let p = jitter(&mut a, [1.0, 2.0, 3.0], [0.5, 0.0, 2.0]);
            assert_eq!(p, jitter(&mut b, [1.0, 2.0, 3.0], [0.5, 0.0, 2.0]));
            assert!((0.5..=1.5).contains(&p[0]));
            assert_eq!(p[1], 2.0);
            assert!((1.0..=5.0).contains(&p[2]));
        }
    }

    #[test]
    fn default_catalogs_are_builtin() {
        let c = Catalogs::default();
        assert!(c.sensors.contains("RGBCamera"));
        assert!(c.agents.resolve("HoveringAUV").is_ok());
    }
}
