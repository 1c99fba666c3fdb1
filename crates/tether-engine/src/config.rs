//! Environment and launch configuration.
//!
//! [`EnvironmentConfig`] is the input for constructing an
//! [`Environment`](crate::Environment). Scenario values override its
//! defaults where the scenario provides them
//! ([`apply_scenario`](EnvironmentConfig::apply_scenario));
//! [`validate()`](EnvironmentConfig::validate) checks structural
//! invariants before any region is mapped or process started.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_comms::MessagingConfig;
use tether_shm::ShmConfig;
use tether_wire::DEFAULT_CAPACITY;

use crate::error::ConfigError;
use crate::scenario::Scenario;

/// Smallest accepted command buffer.
pub const MIN_COMMAND_CAPACITY: usize = 64;

// ── FrameCap ──────────────────────────────────────────────────────

/// Real-time frame rate cap passed to the simulator.
///
/// In scenario JSON this is `true` (match the tick rate), `false`
/// (uncapped) or an integer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FrameCapRepr", into = "FrameCapRepr")]
pub enum FrameCap {
    /// Cap at `ticks_per_sec`.
    #[default]
    MatchTicks,
    /// No cap (`-FramesPerSec=0`).
    Uncapped,
    /// Explicit cap.
    Fps(u32),
}

impl FrameCap {
    /// The `-FramesPerSec=` value for a given tick rate.
    pub fn resolve(self, ticks_per_sec: u32) -> u32 {
        match self {
            Self::MatchTicks => ticks_per_sec,
            Self::Uncapped => 0,
            Self::Fps(n) => n,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum FrameCapRepr {
    Flag(bool),
    Fps(u32),
}

impl From<FrameCapRepr> for FrameCap {
    fn from(r: FrameCapRepr) -> Self {
        match r {
            FrameCapRepr::Flag(true) => Self::MatchTicks,
            FrameCapRepr::Flag(false) => Self::Uncapped,
            FrameCapRepr::Fps(n) => Self::Fps(n),
        }
    }
}

impl From<FrameCap> for FrameCapRepr {
    fn from(c: FrameCap) -> Self {
        match c {
            FrameCap::MatchTicks => Self::Flag(true),
            FrameCap::Uncapped => Self::Flag(false),
            FrameCap::Fps(n) => Self::Fps(n),
        }
    }
}

// ── Policies ──────────────────────────────────────────────────────

/// What to do with a sensor rate that does not divide the tick rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RatePolicy {
    /// Refuse with [`ConfigError::UnevenSensorRate`].
    #[default]
    Reject,
    /// Round the tick period to the nearest integer (at least 1) and warn.
    Round,
}

/// How state snapshots expose sensor data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StateMode {
    /// Copy every published buffer into the snapshot.
    #[default]
    Copy,
    /// Borrow the mapped buffers; valid until the next tick.
    ZeroCopy,
}

/// Handshake and boot deadlines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Deadline for one tick's acquire. Default: 30 s.
    pub tick: Duration,
    /// While a slow-initialising sensor is present, acquires during the
    /// first this-many ticks block without a deadline. Default: 20.
    pub slow_init_ticks: u64,
    /// Deadline for the boot semaphore after launch. Default: 10 s on
    /// POSIX, 100 s on Windows.
    pub boot: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            slow_init_ticks: 20,
            boot: if cfg!(windows) {
                Duration::from_secs(100)
            } else {
                Duration::from_secs(10)
            },
        }
    }
}

// ── EnvironmentConfig ─────────────────────────────────────────────

/// Complete configuration for one environment.
#[derive(Clone, Debug)]
pub struct EnvironmentConfig {
    /// Correlation id embedded in every region and semaphore name.
    /// Default: a fresh v4 uuid. Set it to the running instance's id
    /// when attaching.
    pub uuid: String,
    /// Simulation ticks per simulated second. Default: 30.
    pub ticks_per_sec: u32,
    /// Real-time frame cap. Default: match the tick rate.
    pub frames_per_sec: FrameCap,
    /// Window width in pixels. Default: 1280.
    pub window_width: u32,
    /// Window height in pixels. Default: 720.
    pub window_height: u32,
    /// Ticks run after a reset before the first state is returned.
    /// Default: 2.
    pub pre_start_steps: u32,
    /// Copy or borrow sensor data in snapshots. Default: copy.
    pub state_mode: StateMode,
    /// Render the viewport. Default: true.
    pub show_viewport: bool,
    /// Handling of uneven sensor rates. Default: reject.
    pub rate_policy: RatePolicy,
    /// Deadlines.
    pub timeouts: TimeoutConfig,
    /// Shared-memory placement.
    pub shm: ShmConfig,
    /// Command buffer size in bytes. Default: 1,048,576.
    pub command_capacity: usize,
    /// Messaging behavior.
    pub messaging: MessagingConfig,
    /// Seed for start-pose randomization. Default: 0.
    pub seed: u64,
    /// Install the SIGINT/SIGTERM cleanup hook. Default: true.
    pub install_exit_hook: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            ticks_per_sec: 30,
            frames_per_sec: FrameCap::default(),
            window_width: 1280,
            window_height: 720,
            pre_start_steps: 2,
            state_mode: StateMode::default(),
            show_viewport: true,
            rate_policy: RatePolicy::default(),
            timeouts: TimeoutConfig::default(),
            shm: ShmConfig::default(),
            command_capacity: DEFAULT_CAPACITY,
            messaging: MessagingConfig::default(),
            seed: 0,
            install_exit_hook: true,
        }
    }
}

impl EnvironmentConfig {
    /// Take tick rate, frame cap and window size from the scenario where
    /// it sets them.
    pub fn apply_scenario(&mut self, scenario: &Scenario) {
        if let Some(tps) = scenario.ticks_per_sec {
            self.ticks_per_sec = tps;
        }
        if let Some(fps) = scenario.frames_per_sec {
            self.frames_per_sec = fps;
        }
        if let Some(w) = scenario.window_width {
            self.window_width = w;
        }
        if let Some(h) = scenario.window_height {
            self.window_height = h;
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_sec == 0 {
            return Err(ConfigError::InvalidTickRate);
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::InvalidWindow {
                width: self.window_width,
                height: self.window_height,
            });
        }
        if self.command_capacity < MIN_COMMAND_CAPACITY {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.command_capacity,
                minimum: MIN_COMMAND_CAPACITY,
            });
        }
        if self.timeouts.tick.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.uuid.contains(|c| c == '/' || c == '\0') {
            return Err(ConfigError::InvalidUuid {
                uuid: self.uuid.clone(),
            });
        }
        Ok(())
    }

    /// The `-FramesPerSec=` value.
    pub fn frames_per_sec(&self) -> u32 {
        self.frames_per_sec.resolve(self.ticks_per_sec)
    }
}

// ── LaunchConfig ──────────────────────────────────────────────────

/// How to start the simulator binary.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchConfig {
    /// Path to the simulator executable.
    pub binary_path: PathBuf,
    /// OpenGL version flag (`-opengl{N}`). Default: 4.
    pub gl_version: u32,
    /// Engine log file name. Default: `HolodeckLog.txt`.
    pub log_file: String,
    /// Lower corner of the world bounds. Default: `[-10, -10, -10]`.
    pub env_min: [f64; 3],
    /// Upper corner of the world bounds. Default: `[10, 10, 10]`.
    pub env_max: [f64; 3],
    /// Smallest octree leaf size. Default: 0.02.
    pub octree_min: f64,
    /// Largest octree leaf size. Default: 5.0.
    pub octree_max: f64,
    /// Forward the simulator's stdout/stderr. Default: false.
    pub verbose: bool,
    /// Extra environment variables to remove from the child.
    pub remove_env: Vec<String>,
}

impl LaunchConfig {
    /// Defaults for the binary at `binary_path`.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            gl_version: 4,
            log_file: "HolodeckLog.txt".to_string(),
            env_min: [-10.0; 3],
            env_max: [10.0; 3],
            octree_min: 0.02,
            octree_max: 5.0,
            verbose: false,
            remove_env: Vec::new(),
        }
    }

    /// Take world and octree bounds from the scenario where it sets them.
    pub fn apply_scenario(&mut self, scenario: &Scenario) {
        if let (Some(min), Some(max)) = (scenario.env_min, scenario.env_max) {
            self.env_min = min;
            self.env_max = max;
        }
        if let (Some(min), Some(max)) = (scenario.octree_min, scenario.octree_max) {
            self.octree_min = min;
            self.octree_max = max;
        }
    }

    /// Validate the bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = self.env_min.iter().chain(&self.env_max).all(|v| v.is_finite());
        if !finite || self.env_min.iter().zip(&self.env_max).any(|(a, b)| a >= b) {
            return Err(ConfigError::InvalidBounds {
                what: "world bounds",
                reason: format!("{:?} must be below {:?}", self.env_min, self.env_max),
            });
        }
        if !(self.octree_min.is_finite() && self.octree_min > 0.0)
            || !(self.octree_max.is_finite() && self.octree_min <= self.octree_max)
        {
            return Err(ConfigError::InvalidBounds {
                what: "octree bounds",
                reason: format!(
                    "need 0 < min <= max, got {} and {}",
                    self.octree_min, self.octree_max
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EnvironmentConfig::default().validate().is_ok());
        assert!(LaunchConfig::new("/bin/true").validate().is_ok());
    }

    #[test]
    fn default_uuids_differ() {
        assert_ne!(
            EnvironmentConfig::default().uuid,
            EnvironmentConfig::default().uuid
        );
    }

    #[test]
    fn zero_tick_rate_fails() {
        let cfg = EnvironmentConfig {
            ticks_per_sec: 0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidTickRate) => {}
            other => panic!("expected InvalidTickRate, got {other:?}"),
        }
    }

    #[test]
    fn tiny_capacity_fails() {
        let cfg = EnvironmentConfig {
            command_capacity: 8,
            ..Default::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidCapacity { capacity: 8, .. }) => {}
            other => panic!("expected InvalidCapacity, got {other:?}"),
        }
    }

    #[test]
    fn slash_in_uuid_fails() {
        let cfg = EnvironmentConfig {
            uuid: "a/b".into(),
            ..Default::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidUuid { .. }) => {}
            other => panic!("expected InvalidUuid, got {other:?}"),
        }
    }

    #[test]
    fn frame_cap_resolves() {
        assert_eq!(FrameCap::MatchTicks.resolve(30), 30);
        assert_eq!(FrameCap::Uncapped.resolve(30), 0);
        assert_eq!(FrameCap::Fps(60).resolve(30), 60);
    }

    #[test]
    fn frame_cap_parses_bool_or_int() {
        let caps: Vec<FrameCap> = serde_json::from_str("[true, false, 24]").unwrap();
        assert_eq!(caps, vec![FrameCap::MatchTicks, FrameCap::Uncapped, FrameCap::Fps(24)]);
    }

    #[test]
    fn scenario_overrides_defaults() {
        let scenario = Scenario::from_json_str(
            r#"{"world": "PierHarbor", "ticks_per_sec": 60, "frames_per_sec": false,
                "window_width": 640, "window_height": 480,
                "env_min": [-5, -5, -5], "env_max": [5, 5, 5],
                "octree_min": 0.1, "octree_max": 2.0}"#,
        )
        .unwrap();
        let mut env = EnvironmentConfig::default();
        env.apply_scenario(&scenario);
        assert_eq!(env.ticks_per_sec, 60);
        assert_eq!(env.frames_per_sec(), 0);
        assert_eq!((env.window_width, env.window_height), (640, 480));

        let mut launch = LaunchConfig::new("/bin/true");
        launch.apply_scenario(&scenario);
        assert_eq!(launch.env_min, [-5.0; 3]);
        assert_eq!(launch.octree_max, 2.0);
    }

    #[test]
    fn inverted_bounds_fail() {
        let mut launch = LaunchConfig::new("/bin/true");
        launch.env_min = [0.0, 20.0, 0.0];
        match launch.validate() {
            Err(ConfigError::InvalidBounds {
                what: "world bounds",
                ..
            }) => {}
            other => panic!("expected InvalidBounds, got {other:?}"),
        }
    }
}
