//! Environment lifecycle against the in-process fake simulator.

use tether_core::{CommandPayload, Material, PropKind, TickId};
use tether_engine::environment::RESET_TICKS;
use tether_engine::{
    AgentConfig, ConfigError, EnvError, Environment, Scenario, SensorConfig, SensorData,
    SharedEnvironment, StateMode,
};
use tether_shm::naming;
use tether_test_utils::{fake_environment, fake_environment_with, single_agent, test_config, FakeSimulator};
use tether_wire::WireError;

fn sphere_scenario() -> Scenario {
    let mut s = single_agent("sphere", "SphereAgent");
    s.agents[0] = AgentConfig::new("sphere", "SphereAgent")
        .with_sensor(SensorConfig::new("LocationSensor"))
        .with_sensor(SensorConfig::new("RotationSensor"))
        .with_sensor(SensorConfig::new("VelocitySensor"));
    s
}

/// Route engine logs through the test harness; `RUST_LOG` filters.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn location(env: &mut Environment, ticks: u32) -> Vec<f32> {
    let state = env.tick(ticks).unwrap();
    state
        .single()
        .and_then(|a| a.get("LocationSensor"))
        .and_then(SensorData::as_f32)
        .map(<[f32]>::to_vec)
        .unwrap()
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn reset_spawns_scenario_agents() {
    init_logs();
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    let state = env.reset().unwrap();
    assert_eq!(state.main_agent.as_deref(), Some("sphere"));
    let sphere = state.single().unwrap();
    assert!(sphere.contains("LocationSensor"));
    assert!(sphere.contains("RotationSensor"));
    assert_eq!(state.tick, TickId(u64::from(RESET_TICKS) + 3));

    assert_eq!(sim.agent_names(), vec!["sphere"]);
    assert_eq!(
        sim.sensor_names("sphere"),
        vec!["LocationSensor", "RotationSensor", "VelocitySensor"]
    );
    let kinds = sim.command_kinds();
    assert_eq!(kinds.iter().filter(|k| *k == "SpawnAgent").count(), 1);
    assert_eq!(kinds.iter().filter(|k| *k == "AddSensor").count(), 3);
    assert_eq!(sim.reset_count(), 1);
}

#[test]
fn reset_is_idempotent() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    let first: Vec<String> = env.reset().unwrap().single().unwrap().sensors.keys().cloned().collect();
    env.act("sphere", &[1.0, 1.0]).unwrap();
    env.tick(2).unwrap();
    let second: Vec<String> = env.reset().unwrap().single().unwrap().sensors.keys().cloned().collect();

    assert_eq!(first, second);
    assert_eq!(env.agents().len(), 1);
    assert_eq!(sim.agent_names(), vec!["sphere"]);
    assert_eq!(sim.reset_count(), 2);
    // Actions do not survive a reset.
    assert_eq!(env.agents().agent("sphere").unwrap().action(), vec![0.0, 0.0]);
    assert_eq!(sim.agent_location("sphere"), Some([0.0, 0.0, 0.0]));
}

#[test]
fn step_before_reset_fails() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    match env.step(&[0.0, 0.0], 1) {
        Err(EnvError::NotReset) => {}
        other => panic!("expected NotReset, got {other:?}"),
    }
    match env.tick(1) {
        Err(EnvError::NotReset) => {}
        other => panic!("expected NotReset, got {other:?}"),
    }
}

#[test]
fn zero_ticks_rejected() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    match env.tick(0) {
        Err(EnvError::InvalidTickCount) => {}
        other => panic!("expected InvalidTickCount, got {other:?}"),
    }
}

#[test]
fn step_acts_on_main_agent_every_tick() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    let before = env.current_tick();

    let state = env.step(&[1.0, 0.5], 1).unwrap();
    let loc = state.single().unwrap().get("LocationSensor").unwrap();
    assert_eq!(loc.as_f32(), Some(&[1.0, 0.5, 0.0][..]));

    let state = env.step(&[1.0, 0.5], 3).unwrap();
    assert_eq!(state.tick, TickId(before.0 + 4));
    let loc = state.single().unwrap().get("LocationSensor").unwrap();
    assert_eq!(loc.as_f32(), Some(&[4.0, 2.0, 0.0][..]));
    assert_eq!(sim.agent_location("sphere"), Some([4.0, 2.0, 0.0]));
}

#[test]
fn step_without_main_agent_fails() {
    let mut scenario = sphere_scenario();
    scenario.main_agent = None;
    let (mut env, _sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();
    match env.step(&[0.0, 0.0], 1) {
        Err(EnvError::NoMainAgent) => {}
        other => panic!("expected NoMainAgent, got {other:?}"),
    }
    // tick still works, and a sole agent still maps to its name.
    let state = env.tick(1).unwrap();
    assert!(state.agent("sphere").is_some());
}

#[test]
fn long_action_rejected() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    match env.step(&[1.0, 2.0, 3.0], 1) {
        Err(EnvError::Config(ConfigError::ActionTooLong { len: 3, capacity: 2, .. })) => {}
        other => panic!("expected ActionTooLong, got {other:?}"),
    }
}

#[test]
fn close_is_idempotent_and_unlinks_regions() {
    let (mut env, _sim, dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    assert!(std::fs::read_dir(dir.path()).unwrap().count() > 0);

    env.close();
    env.close();
    assert!(env.is_torn_down());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    match env.reset() {
        Err(EnvError::TornDown) => {}
        other => panic!("expected TornDown, got {other:?}"),
    }
}

#[test]
fn stalled_simulator_tears_down() {
    init_logs();
    let (mut config, _dir) = test_config();
    config.timeouts.tick = std::time::Duration::from_millis(50);
    let (mut env, sim) = fake_environment_with(config, sphere_scenario()).unwrap();
    env.reset().unwrap();
    let tick = env.current_tick();

    sim.stall(true);
    let err = env.tick(1).unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_fatal());
    assert!(env.is_torn_down());
    assert_eq!(env.current_tick(), tick);
    match env.tick(1) {
        Err(EnvError::TornDown) => {}
        other => panic!("expected TornDown, got {other:?}"),
    }
}

// ── Sensors ────────────────────────────────────────────────────────

#[test]
fn sensor_publishes_at_its_rate() {
    let mut scenario = sphere_scenario();
    scenario.agents[0]
        .sensors
        .push(SensorConfig::new("DepthSensor").hz(10.0));
    let (mut env, _sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();
    assert_eq!(
        env.agents().sensor("sphere", "DepthSensor").unwrap().tick_every(),
        3
    );

    let mut published = 0;
    for _ in 0..9 {
        let state = env.tick(1).unwrap();
        let sphere = state.single().unwrap();
        assert!(sphere.contains("LocationSensor"));
        if sphere.contains("DepthSensor") {
            published += 1;
        }
    }
    assert_eq!(published, 3);
}

#[test]
fn uneven_rate_rejected_at_reset() {
    let mut scenario = sphere_scenario();
    scenario.agents[0]
        .sensors
        .push(SensorConfig::new("DepthSensor").hz(7.0));
    let (mut env, _sim, _dir) = fake_environment(scenario);
    match env.reset() {
        Err(EnvError::Config(ConfigError::UnevenSensorRate { hz, .. })) => assert_eq!(hz, 7.0),
        other => panic!("expected UnevenSensorRate, got {other:?}"),
    }
}

#[test]
fn rate_above_tick_rate_rejected() {
    let mut scenario = sphere_scenario();
    scenario.agents[0]
        .sensors
        .push(SensorConfig::new("DepthSensor").hz(60.0));
    let (mut env, _sim, _dir) = fake_environment(scenario);
    match env.reset() {
        Err(EnvError::Config(ConfigError::SensorRateTooHigh { .. })) => {}
        other => panic!("expected SensorRateTooHigh, got {other:?}"),
    }
}

#[test]
fn nan_sensor_is_absent() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    sim.nan_fill("sphere", "VelocitySensor", true);
    let state = env.tick(1).unwrap();
    let sphere = state.single().unwrap();
    assert!(!sphere.contains("VelocitySensor"));
    assert!(sphere.contains("LocationSensor"));

    sim.nan_fill("sphere", "VelocitySensor", false);
    assert!(env.tick(1).unwrap().single().unwrap().contains("VelocitySensor"));
}

#[test]
fn zero_copy_borrows_buffers() {
    let (mut config, _dir) = test_config();
    config.state_mode = StateMode::ZeroCopy;
    let (mut env, _sim) = fake_environment_with(config, sphere_scenario()).unwrap();
    let state = env.reset().unwrap();
    let loc = state.single().unwrap().get("LocationSensor").unwrap();
    assert!(loc.is_borrowed());
    let owned = state.into_owned();
    assert!(!owned.single().unwrap().get("LocationSensor").unwrap().is_borrowed());

    let (mut copy_env, _sim, _dir2) = fake_environment(sphere_scenario());
    let state = copy_env.reset().unwrap();
    assert!(!state.single().unwrap().get("LocationSensor").unwrap().is_borrowed());
}

#[test]
fn task_sensor_sets_reward_and_terminal() {
    let mut scenario = sphere_scenario();
    scenario.agents[0]
        .sensors
        .push(SensorConfig::new("DistanceTask"));
    let (mut env, sim, _dir) = fake_environment(scenario);
    let state = env.reset().unwrap();
    assert_eq!(state.reward, Some(0.0));
    assert_eq!(state.terminal, Some(false));

    sim.set_task(2.5, true);
    let state = env.tick(1).unwrap();
    assert_eq!(state.reward, Some(2.5));
    assert_eq!(state.terminal, Some(true));
}

#[test]
fn runtime_sensor_management() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();

    env.add_sensor("sphere", &SensorConfig::new("DepthSensor").named("depth"))
        .unwrap();
    assert!(env.tick(1).unwrap().single().unwrap().contains("depth"));
    assert!(sim.sensor_names("sphere").contains(&"depth".to_string()));

    env.remove_sensor("sphere", "depth").unwrap();
    assert!(!env.tick(1).unwrap().single().unwrap().contains("depth"));
    assert!(!sim.sensor_names("sphere").contains(&"depth".to_string()));

    env.rotate_sensor("sphere", "LocationSensor", [0.0, 90.0, 0.0])
        .unwrap();
    env.tick(1).unwrap();
    assert_eq!(sim.command_kinds().last().map(String::as_str), Some("RotateSensor"));

    match env.remove_sensor("sphere", "depth") {
        Err(EnvError::Config(ConfigError::UnknownSensor { .. })) => {}
        other => panic!("expected UnknownSensor, got {other:?}"),
    }
}

#[test]
fn rejected_sensor_leaves_nothing_behind() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    let queued = env.queued_commands();

    match env.add_sensor("sphere", &SensorConfig::new("LocationSensor")) {
        Err(EnvError::Config(ConfigError::DuplicateSensor { sensor, .. })) => {
            assert_eq!(sensor, "LocationSensor");
        }
        other => panic!("expected DuplicateSensor, got {other:?}"),
    }
    assert_eq!(env.queued_commands(), queued);

    match env.add_sensor("sphere", &SensorConfig::new("DepthSensor").named("depth").hz(1000.0)) {
        Err(EnvError::Config(ConfigError::SensorRateTooHigh { .. })) => {}
        other => panic!("expected SensorRateTooHigh, got {other:?}"),
    }
    assert_eq!(env.queued_commands(), queued);
    assert!(env.agents().sensor("sphere", "depth").is_err());

    env.tick(1).unwrap();
    let adds = sim.command_kinds().iter().filter(|k| *k == "AddSensor").count();
    assert_eq!(adds, 3);
    assert_eq!(
        sim.sensor_names("sphere"),
        vec!["LocationSensor", "RotationSensor", "VelocitySensor"]
    );
}

#[test]
fn removed_sensor_name_can_take_a_new_shape() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.add_sensor("sphere", &SensorConfig::new("LocationSensor").named("extra"))
        .unwrap();
    env.tick(1).unwrap();
    env.remove_sensor("sphere", "extra").unwrap();
    env.tick(1).unwrap();

    env.add_sensor("sphere", &SensorConfig::new("IMUSensor").named("extra"))
        .unwrap();
    let expected = env
        .agents()
        .sensor("sphere", "extra")
        .unwrap()
        .descriptor()
        .spec
        .len();
    assert_ne!(expected, 3);
    let state = env.tick(1).unwrap();
    let extra = state.single().unwrap().get("extra").unwrap();
    assert_eq!(extra.as_f32().unwrap().len(), expected);
}

#[test]
fn capture_rate_only_for_cameras() {
    let mut scenario = sphere_scenario();
    scenario.agents[0].sensors.push(
        SensorConfig::new("RGBCamera")
            .configured(serde_json::json!({"CaptureWidth": 8, "CaptureHeight": 8})),
    );
    let (mut env, sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();

    match env.set_ticks_per_capture("sphere", "LocationSensor", 2) {
        Err(EnvError::Config(ConfigError::NotACamera { sensor_type, .. })) => {
            assert_eq!(sensor_type, "LocationSensor");
        }
        other => panic!("expected NotACamera, got {other:?}"),
    }
    match env.set_ticks_per_capture("sphere", "RGBCamera", 0) {
        Err(EnvError::Config(ConfigError::InvalidCaptureRate { .. })) => {}
        other => panic!("expected InvalidCaptureRate, got {other:?}"),
    }

    env.set_ticks_per_capture("sphere", "RGBCamera", 2).unwrap();
    assert_eq!(env.agents().sensor("sphere", "RGBCamera").unwrap().tick_every(), 2);
    let mut seen = 0;
    for _ in 0..4 {
        if env.tick(1).unwrap().single().unwrap().contains("RGBCamera") {
            seen += 1;
        }
    }
    assert_eq!(seen, 2);
    let rate = sim
        .commands()
        .into_iter()
        .find(|c| c.kind == "RGBCameraRate")
        .unwrap();
    assert_eq!(rate.number(2), Some(2.0));
}

#[test]
fn add_sensor_config_carries_capture_rate() {
    let mut scenario = sphere_scenario();
    scenario.agents[0].sensors.push(
        SensorConfig::new("RGBCamera")
            .hz(10.0)
            .configured(serde_json::json!({"CaptureWidth": 8, "CaptureHeight": 8})),
    );
    let (mut env, sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();
    let add = sim
        .commands()
        .into_iter()
        .find(|c| c.kind == "AddSensor" && c.text(1) == Some("RGBCamera"))
        .unwrap();
    let config: serde_json::Value = serde_json::from_str(add.text(3).unwrap()).unwrap();
    assert_eq!(config["TicksPerCapture"], 3);
}

// ── Agents ─────────────────────────────────────────────────────────

#[test]
fn teleport_applies_once() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.teleport("sphere", Some([5.0, 5.0, 5.0]), None).unwrap();
    assert_eq!(location(&mut env, 1), vec![5.0, 5.0, 5.0]);

    env.act("sphere", &[1.0, 0.0]).unwrap();
    assert_eq!(location(&mut env, 2), vec![7.0, 5.0, 5.0]);

    env.teleport("sphere", None, Some([0.0, 0.0, 90.0])).unwrap();
    env.tick(1).unwrap();
    assert_eq!(sim.agent_rotation("sphere"), Some([0.0, 0.0, 90.0]));
    assert_eq!(sim.agent_location("sphere"), Some([8.0, 5.0, 5.0]));
}

#[test]
fn physics_state_overwrites_pose() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.set_physics_state("sphere", [1.0, 2.0, 3.0], [10.0, 20.0, 30.0], [0.0; 3], [0.0; 3])
        .unwrap();
    env.tick(1).unwrap();
    assert_eq!(sim.agent_location("sphere"), Some([1.0, 2.0, 3.0]));
    assert_eq!(sim.agent_rotation("sphere"), Some([10.0, 20.0, 30.0]));
}

#[test]
fn control_scheme_wraps() {
    let scenario = single_agent("auv", "HoveringAUV");
    let (mut env, sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();
    assert_eq!(env.set_control_scheme("auv", 4).unwrap(), 1);
    env.tick(1).unwrap();
    assert_eq!(sim.control_scheme("auv"), Some(1));
}

#[test]
fn duplicate_agent_rejected() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    match env.add_agent(&AgentConfig::new("sphere", "SphereAgent"), false) {
        Err(EnvError::Config(ConfigError::DuplicateAgent { name })) => assert_eq!(name, "sphere"),
        other => panic!("expected DuplicateAgent, got {other:?}"),
    }
}

#[test]
fn added_agent_does_not_survive_reset() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.add_agent(&AgentConfig::new("extra", "TurtleAgent").at([3.0, 0.0, 0.0]), false)
        .unwrap();
    env.tick(1).unwrap();
    assert_eq!(sim.agent_names(), vec!["sphere", "extra"]);
    assert_eq!(sim.agent_location("extra"), Some([3.0, 0.0, 0.0]));

    env.reset().unwrap();
    assert_eq!(sim.agent_names(), vec!["sphere"]);
    assert!(env.agents().get("extra").is_none());
}

#[test]
fn failed_add_agent_registers_nothing() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    let queued = env.queued_commands();
    let turtle = AgentConfig::new("extra", "TurtleAgent")
        .with_sensor(SensorConfig::new("LocationSensor"))
        .with_sensor(SensorConfig::new("DepthSensor").hz(1000.0));
    match env.add_agent(&turtle, true) {
        Err(EnvError::Config(ConfigError::SensorRateTooHigh { sensor, .. })) => {
            assert_eq!(sensor, "DepthSensor");
        }
        other => panic!("expected SensorRateTooHigh, got {other:?}"),
    }
    assert_eq!(env.queued_commands(), queued);
    assert!(env.agents().get("extra").is_none());
    assert_eq!(env.agents().main().unwrap().name(), "sphere");
    env.tick(1).unwrap();
    assert_eq!(sim.agent_names(), vec!["sphere"]);
}

#[test]
fn agent_too_large_to_queue_is_rolled_back() {
    let (mut config, _dir) = test_config();
    config.command_capacity = 4096;
    let (mut env, sim) = fake_environment_with(config, sphere_scenario()).unwrap();
    env.reset().unwrap();
    let queued = env.queued_commands();
    let padded = SensorConfig::new("LocationSensor")
        .configured(serde_json::json!({"note": "x".repeat(5000)}));
    let turtle = AgentConfig::new("extra", "TurtleAgent").with_sensor(padded);
    match env.add_agent(&turtle, true) {
        Err(EnvError::Wire(WireError::CapacityExceeded { capacity, .. })) => {
            assert_eq!(capacity, 4096);
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert_eq!(env.queued_commands(), queued);
    assert!(env.agents().get("extra").is_none());
    let main = env.agents().main().unwrap();
    assert_eq!(main.name(), "sphere");
    assert!(main.is_main());

    let shm = &env.config().shm;
    let uuid = &env.config().uuid;
    assert!(!shm.region_path(uuid, &naming::action("extra")).exists());
    assert!(!shm
        .region_path(uuid, &naming::sensor_data("extra", "LocationSensor"))
        .exists());
    assert!(shm.region_path(uuid, &naming::action("sphere")).exists());

    env.tick(1).unwrap();
    assert_eq!(sim.agent_names(), vec!["sphere"]);
}

#[test]
fn reset_releases_regions_of_added_agents() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.add_agent(
        &AgentConfig::new("extra", "TurtleAgent").with_sensor(SensorConfig::new("LocationSensor")),
        false,
    )
    .unwrap();
    env.tick(1).unwrap();
    let path = |env: &Environment, name: &str| env.config().shm.region_path(&env.config().uuid, name);
    let extra = naming::sensor_data("extra", "LocationSensor");
    assert!(path(&env, &extra).exists());

    env.reset().unwrap();
    assert!(!path(&env, &extra).exists());
    assert!(!path(&env, &naming::teleport_flag("extra")).exists());
    assert!(path(&env, &naming::sensor_data("sphere", "LocationSensor")).exists());
}

#[test]
fn bad_sensor_rate_fails_reset_before_anything_is_sent() {
    let mut scenario = sphere_scenario();
    scenario.agents[0].sensors.push(SensorConfig::new("DepthSensor").hz(1000.0));
    let (mut env, sim, _dir) = fake_environment(scenario);
    let queued = env.queued_commands();
    match env.reset() {
        Err(EnvError::Config(ConfigError::SensorRateTooHigh { .. })) => {}
        other => panic!("expected SensorRateTooHigh, got {other:?}"),
    }
    assert_eq!(env.queued_commands(), queued);
    assert!(env.agents().is_empty());
    assert_eq!(sim.reset_count(), 0);
    assert!(!sim.command_kinds().iter().any(|k| k == "SpawnAgent"));
    match env.tick(1) {
        Err(EnvError::NotReset) => {}
        other => panic!("expected NotReset, got {other:?}"),
    }
}

#[test]
fn randomized_spawn_is_seeded() {
    let spawn = |seed: u64| {
        let mut scenario = sphere_scenario();
        scenario.agents[0].location_randomization = [2.0, 2.0, 0.0];
        let (mut config, _dir) = test_config();
        config.seed = seed;
        let (mut env, sim) = fake_environment_with(config, scenario).unwrap();
        env.reset().unwrap();
        sim.agent_location("sphere").unwrap()
    };
    let a = spawn(11);
    assert_eq!(a, spawn(11));
    assert!(a[0].abs() <= 2.0 && a[1].abs() <= 2.0);
    assert_eq!(a[2], 0.0);
}

#[test]
fn existing_agents_are_not_spawned() {
    let mut scenario = sphere_scenario();
    scenario.agents[0].existing = true;
    let (mut env, sim, _dir) = fake_environment(scenario);
    env.reset().unwrap();
    assert!(!sim.command_kinds().iter().any(|k| k == "SpawnAgent"));
    assert!(env.agents().get("sphere").is_some());
}

// ── Commands ───────────────────────────────────────────────────────

#[test]
fn oversized_command_rejected_without_teardown() {
    let (mut config, _dir) = test_config();
    config.command_capacity = 256;
    let (mut env, _sim) = fake_environment_with(config, Scenario::default()).unwrap();
    let long = "x".repeat(300);
    match env.send_world_command("Paint", &[], &[&long]) {
        Err(EnvError::Wire(WireError::CapacityExceeded { capacity, .. })) => {
            assert_eq!(capacity, 256);
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert!(!env.is_torn_down());
    env.reset().unwrap();
}

#[test]
fn world_commands_reach_the_simulator() {
    let (mut env, sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    env.draw_line([0.0; 3], [1.0, 1.0, 1.0], None, None).unwrap();
    env.draw_point([2.0; 3], Some([0, 255, 0]), Some(5.0)).unwrap();
    env.move_viewport([0.0, 0.0, 10.0], [0.0; 3]).unwrap();
    env.set_render_quality(2).unwrap();
    env.spawn_prop(
        PropKind::Sphere,
        [1.0, 2.0, 3.0],
        [0.0; 3],
        [1.0; 3],
        true,
        Material::Gold,
        "ball",
    )
    .unwrap();
    assert_eq!(env.queued_commands(), 5);
    env.tick(1).unwrap();
    assert_eq!(env.queued_commands(), 0);

    let kinds = sim.command_kinds();
    let tail: Vec<&str> = kinds[kinds.len() - 5..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec!["DebugDraw", "DebugDraw", "TeleportCamera", "AdjustRenderQuality", "CustomCommand"]
    );
    let prop = sim.commands().pop().unwrap();
    let expected = CommandPayload::spawn_prop(
        PropKind::Sphere,
        [1.0, 2.0, 3.0],
        [0.0; 3],
        [1.0; 3],
        true,
        Material::Gold,
        "ball",
    );
    assert_eq!(prop.params, expected.params());

    match env.set_render_quality(4) {
        Err(EnvError::Config(ConfigError::InvalidRenderQuality { quality: 4 })) => {}
        other => panic!("expected InvalidRenderQuality, got {other:?}"),
    }
}

#[test]
fn hidden_viewport_sends_render_off_first() {
    let (mut config, _dir) = test_config();
    config.show_viewport = false;
    let (mut env, sim) = fake_environment_with(config, sphere_scenario()).unwrap();
    env.reset().unwrap();
    let first = sim.commands().into_iter().next().unwrap();
    assert_eq!(first.kind, "RenderViewport");
    assert_eq!(first.number(0), Some(0.0));
}

// ── Sharing and threads ────────────────────────────────────────────

#[test]
fn shared_environment_fails_fast_when_busy() {
    let (env, _sim, _dir) = fake_environment(sphere_scenario());
    let shared = SharedEnvironment::new(env);
    shared.reset().unwrap();

    let other = shared.clone();
    shared
        .with(|env| {
            match other.tick(1) {
                Err(EnvError::Busy) => {}
                res => panic!("expected Busy, got {res:?}"),
            }
            env.tick(1).map(|_| ())
        })
        .unwrap();

    let state = std::thread::spawn(move || other.step(&[1.0, 0.0], 1))
        .join()
        .unwrap()
        .unwrap();
    assert!(state.single().unwrap().contains("LocationSensor"));
}

#[test]
fn threaded_simulator_drives_environment() {
    let (mut config, _dir) = test_config();
    config.timeouts.tick = std::time::Duration::from_secs(5);
    let scenario = sphere_scenario();
    config.apply_scenario(&scenario);
    let sim = FakeSimulator::new(&config).unwrap();
    let handle = sim.handle();
    let (handshake, thread) = sim.spawn();

    let mut env = Environment::with_handshake(config, scenario, handshake).unwrap();
    env.reset().unwrap();
    let state = env.step(&[0.5, 0.0], 2).unwrap();
    assert_eq!(
        state.single().unwrap().get("LocationSensor").unwrap().as_f32(),
        Some(&[1.0, 0.0, 0.0][..])
    );
    let steps = handle.steps();
    drop(env);
    assert_eq!(thread.join().unwrap(), steps);
}

#[test]
fn info_lists_agents() {
    let (mut env, _sim, _dir) = fake_environment(sphere_scenario());
    env.reset().unwrap();
    let info = env.info();
    assert!(info.contains("TestWorld"));
    assert!(info.contains("sphere"));
    assert!(info.contains("LocationSensor"));
}
