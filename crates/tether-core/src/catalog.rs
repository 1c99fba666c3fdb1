//! Declarative sensor and agent catalogs.
//!
//! A scenario names sensors and agents by type string. The catalogs
//! resolve each name once, at load time, into a fixed descriptor
//! ([`SensorDescriptor`] / [`AgentDescriptor`]); nothing downstream
//! dispatches on type strings again.
//!
//! Both catalogs are registered-factory tables. [`SensorCatalog::builtin`]
//! and [`AgentCatalog::builtin`] cover the stock simulator types; worlds
//! shipping custom types register them before the environment is built.

use indexmap::IndexMap;
use serde_json::Value;

use crate::buffer::{BufferSpec, ElementType};
use crate::error::CatalogError;

// ── Sensors ───────────────────────────────────────────────────────

/// How the client treats a sensor's buffer beyond plain publication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorRole {
    /// Published as raw data, subject to sub-sampling.
    Plain,
    /// Acoustic beacon: `[azimuth, elevation, range, depth]`, handled by
    /// the messaging state machine.
    AcousticBeacon,
    /// Optical modem: a one-byte line-of-sight gate, handled by the
    /// messaging state machine.
    OpticalModem,
    /// Task sensor: `[reward, terminal]`.
    Task,
}

/// Computes a sensor's buffer from its configuration block.
pub type ShapeFn = fn(&Value) -> Result<BufferSpec, CatalogError>;

#[derive(Clone)]
enum ShapeRule {
    Fixed(BufferSpec),
    Configured(ShapeFn),
}

#[derive(Clone)]
struct SensorEntry {
    rule: ShapeRule,
    role: SensorRole,
    slow_init: bool,
    capture_rate_in_config: bool,
}

/// A resolved sensor type.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorDescriptor {
    /// Catalog type name.
    pub type_name: String,
    /// Shape of the `{agent}_{sensor}_sensor_data` buffer.
    pub spec: BufferSpec,
    /// Messaging / task role.
    pub role: SensorRole,
    /// Takes many ticks to initialize (e.g. builds a large spatial index);
    /// the first ticks of a run wait without a deadline.
    pub slow_init: bool,
    /// The simulator reads the sample rate from `TicksPerCapture` in the
    /// configuration block rather than capturing every tick.
    pub capture_rate_in_config: bool,
}

/// Registered sensor types.
#[derive(Clone, Default)]
pub struct SensorCatalog {
    entries: IndexMap<String, SensorEntry>,
}

impl SensorCatalog {
    /// A catalog with no types registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stock simulator sensors.
    pub fn builtin() -> Self {
        let mut c = Self::empty();
        let f32v = |n| BufferSpec::vector(n, ElementType::F32);

        for name in ["LocationSensor", "RotationSensor", "VelocitySensor"] {
            c.register_fixed(name, f32v(3), SensorRole::Plain);
        }
        c.register_fixed("GPSSensor", f32v(3), SensorRole::Plain);
        c.register_fixed("DVLSensor", f32v(3), SensorRole::Plain);
        c.register_fixed("DepthSensor", f32v(1), SensorRole::Plain);
        c.register_fixed("WorldNumSensor", f32v(1), SensorRole::Plain);
        c.register_fixed("DynamicsSensor", f32v(18), SensorRole::Plain);
        c.register_fixed(
            "OrientationSensor",
            BufferSpec::new([3, 3], ElementType::F32),
            SensorRole::Plain,
        );
        c.register_fixed(
            "PoseSensor",
            BufferSpec::new([4, 4], ElementType::F32),
            SensorRole::Plain,
        );
        c.register_fixed(
            "CollisionSensor",
            BufferSpec::vector(1, ElementType::Bool),
            SensorRole::Plain,
        );
        c.register_configured("IMUSensor", imu_shape, SensorRole::Plain);
        c.register_configured("RangeFinderSensor", range_finder_shape, SensorRole::Plain);
        c.register_configured("RGBCamera", camera_shape, SensorRole::Plain);
        c.register_configured("ViewportCapture", camera_shape, SensorRole::Plain);
        if let Some(e) = c.entries.get_mut("RGBCamera") {
            e.capture_rate_in_config = true;
        }
        c.register_configured("SonarSensor", sonar_shape, SensorRole::Plain);
        if let Some(e) = c.entries.get_mut("SonarSensor") {
            e.slow_init = true;
            e.capture_rate_in_config = true;
        }
        c.register_fixed("AcousticBeaconSensor", f32v(4), SensorRole::AcousticBeacon);
        c.register_fixed(
            "OpticalModemSensor",
            BufferSpec::vector(1, ElementType::Bool),
            SensorRole::OpticalModem,
        );
        for task in [
            "DistanceTask",
            "LocationTask",
            "FollowTask",
            "AvoidTask",
            "CupGameTask",
            "CleanUpTask",
        ] {
            c.register_fixed(task, f32v(2), SensorRole::Task);
        }
        c
    }

    /// Register (or replace) a type with a fixed buffer.
    pub fn register_fixed(&mut self, type_name: &str, spec: BufferSpec, role: SensorRole) {
        self.insert(type_name, ShapeRule::Fixed(spec), role);
    }

    /// Register (or replace) a type whose buffer depends on its configuration.
    pub fn register_configured(&mut self, type_name: &str, shape: ShapeFn, role: SensorRole) {
        self.insert(type_name, ShapeRule::Configured(shape), role);
    }

    /// Mark a registered type as slow to initialize.
    pub fn set_slow_init(&mut self, type_name: &str, slow: bool) {
        if let Some(e) = self.entries.get_mut(type_name) {
            e.slow_init = slow;
        }
    }

    fn insert(&mut self, type_name: &str, rule: ShapeRule, role: SensorRole) {
        self.entries.insert(
            type_name.to_string(),
            SensorEntry {
                rule,
                role,
                slow_init: false,
                capture_rate_in_config: false,
            },
        );
    }

    /// Whether `type_name` is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Resolve a type name and its configuration block.
    pub fn resolve(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<SensorDescriptor, CatalogError> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| CatalogError::UnknownSensorType {
                name: type_name.to_string(),
            })?;
        let spec = match &entry.rule {
            ShapeRule::Fixed(spec) => spec.clone(),
            ShapeRule::Configured(f) => f(config)?,
        };
        if spec.is_empty() {
            return Err(CatalogError::InvalidSensorConfig {
                sensor_type: type_name.to_string(),
                key: "shape".to_string(),
                reason: format!("resolved to an empty buffer {spec}"),
            });
        }
        Ok(SensorDescriptor {
            type_name: type_name.to_string(),
            spec,
            role: entry.role,
            slow_init: entry.slow_init,
            capture_rate_in_config: entry.capture_rate_in_config,
        })
    }
}

impl std::fmt::Debug for SensorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

fn config_usize(
    sensor_type: &str,
    config: &Value,
    key: &str,
    default: usize,
) -> Result<usize, CatalogError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| CatalogError::InvalidSensorConfig {
                sensor_type: sensor_type.to_string(),
                key: key.to_string(),
                reason: format!("expected a non-negative integer, got {v}"),
            }),
    }
}

fn config_bool(
    sensor_type: &str,
    config: &Value,
    key: &str,
) -> Result<bool, CatalogError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(v) => Err(CatalogError::InvalidSensorConfig {
            sensor_type: sensor_type.to_string(),
            key: key.to_string(),
            reason: format!("expected a boolean, got {v}"),
        }),
    }
}

fn imu_shape(config: &Value) -> Result<BufferSpec, CatalogError> {
    let rows = if config_bool("IMUSensor", config, "ReturnBias")? {
        4
    } else {
        2
    };
    Ok(BufferSpec::new([rows, 3], ElementType::F32))
}

fn range_finder_shape(config: &Value) -> Result<BufferSpec, CatalogError> {
    let lasers = config_usize("RangeFinderSensor", config, "LaserCount", 1)?;
    Ok(BufferSpec::vector(lasers, ElementType::F32))
}

fn camera_shape(config: &Value) -> Result<BufferSpec, CatalogError> {
    let h = config_usize("RGBCamera", config, "CaptureHeight", 256)?;
    let w = config_usize("RGBCamera", config, "CaptureWidth", 256)?;
    Ok(BufferSpec::new([h, w, 4], ElementType::U8))
}

fn sonar_shape(config: &Value) -> Result<BufferSpec, CatalogError> {
    let range = config_usize("SonarSensor", config, "BinsRange", 300)?;
    let azimuth = config_usize("SonarSensor", config, "BinsAzimuth", 128)?;
    Ok(BufferSpec::new([range, azimuth], ElementType::F32))
}

// ── Agents ────────────────────────────────────────────────────────

/// A resolved agent type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentDescriptor {
    /// Catalog type name.
    pub type_name: String,
    /// Length of the action buffer: the longest control scheme.
    pub action_len: usize,
    /// Number of control schemes the agent accepts.
    pub control_schemes: u8,
}

/// Registered agent types.
#[derive(Clone, Debug, Default)]
pub struct AgentCatalog {
    entries: IndexMap<String, AgentDescriptor>,
}

impl AgentCatalog {
    /// A catalog with no types registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stock simulator agents.
    pub fn builtin() -> Self {
        let mut c = Self::empty();
        c.register("HoveringAUV", 8, 3);
        c.register("TorpedoAUV", 6, 2);
        c.register("SurfaceVessel", 6, 3);
        c.register("UAV", 4, 2);
        c.register("SphereAgent", 2, 2);
        c.register("TurtleAgent", 2, 1);
        c.register("NavAgent", 3, 1);
        c
    }

    /// Register (or replace) an agent type.
    pub fn register(&mut self, type_name: &str, action_len: usize, control_schemes: u8) {
        self.entries.insert(
            type_name.to_string(),
            AgentDescriptor {
                type_name: type_name.to_string(),
                action_len,
                control_schemes: control_schemes.max(1),
            },
        );
    }

    /// Resolve a type name.
    pub fn resolve(&self, type_name: &str) -> Result<AgentDescriptor, CatalogError> {
        self.entries
            .get(type_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownAgentType {
                name: type_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fixed_sensor_ignores_config() {
        let c = SensorCatalog::builtin();
        let d = c.resolve("LocationSensor", &json!({"Anything": 1})).unwrap();
        assert_eq!(d.spec, BufferSpec::vector(3, ElementType::F32));
        assert_eq!(d.role, SensorRole::Plain);
        assert!(!d.slow_init);
    }

    #[test]
    fn camera_shape_follows_config() {
        let c = SensorCatalog::builtin();
        let d = c
            .resolve("RGBCamera", &json!({"CaptureWidth": 64, "CaptureHeight": 32}))
            .unwrap();
        assert_eq!(d.spec, BufferSpec::new([32, 64, 4], ElementType::U8));
        assert!(d.capture_rate_in_config);
    }

    #[test]
    fn imu_with_bias_has_four_rows() {
        let c = SensorCatalog::builtin();
        let d = c.resolve("IMUSensor", &json!({"ReturnBias": true})).unwrap();
        assert_eq!(d.spec.shape.as_slice(), &[4, 3]);
        let d = c.resolve("IMUSensor", &Value::Null).unwrap();
        assert_eq!(d.spec.shape.as_slice(), &[2, 3]);
    }

    #[test]
    fn sonar_is_slow_to_initialize() {
        let c = SensorCatalog::builtin();
        let d = c.resolve("SonarSensor", &json!({})).unwrap();
        assert!(d.slow_init);
        assert_eq!(d.spec.shape.as_slice(), &[300, 128]);
    }

    #[test]
    fn communication_roles() {
        let c = SensorCatalog::builtin();
        let beacon = c.resolve("AcousticBeaconSensor", &json!({})).unwrap();
        assert_eq!(beacon.role, SensorRole::AcousticBeacon);
        assert_eq!(beacon.spec.len(), 4);
        let modem = c.resolve("OpticalModemSensor", &json!({})).unwrap();
        assert_eq!(modem.role, SensorRole::OpticalModem);
        assert_eq!(modem.spec.element, ElementType::Bool);
    }

    #[test]
    fn unknown_sensor_type() {
        let c = SensorCatalog::builtin();
        match c.resolve("TelepathySensor", &json!({})) {
            Err(CatalogError::UnknownSensorType { name }) => assert_eq!(name, "TelepathySensor"),
            other => panic!("expected UnknownSensorType, got {other:?}"),
        }
    }

    #[test]
    fn bad_config_value_is_rejected() {
        let c = SensorCatalog::builtin();
        match c.resolve("RangeFinderSensor", &json!({"LaserCount": "many"})) {
            Err(CatalogError::InvalidSensorConfig { key, .. }) => assert_eq!(key, "LaserCount"),
            other => panic!("expected InvalidSensorConfig, got {other:?}"),
        }
    }

    #[test]
    fn zero_sized_shape_is_rejected() {
        let c = SensorCatalog::builtin();
        assert!(matches!(
            c.resolve("RangeFinderSensor", &json!({"LaserCount": 0})),
            Err(CatalogError::InvalidSensorConfig { .. })
        ));
    }

    #[test]
    fn custom_registration_is_resolvable() {
        let mut c = SensorCatalog::empty();
        c.register_fixed(
            "ThermoSensor",
            BufferSpec::vector(2, ElementType::F64),
            SensorRole::Plain,
        );
        c.set_slow_init("ThermoSensor", true);
        let d = c.resolve("ThermoSensor", &Value::Null).unwrap();
        assert!(d.slow_init);
        assert_eq!(d.spec.byte_len(), 16);
    }

    #[test]
    fn agent_catalog_resolves_action_length() {
        let c = AgentCatalog::builtin();
        let auv = c.resolve("HoveringAUV").unwrap();
        assert_eq!(auv.action_len, 8);
        assert_eq!(auv.control_schemes, 3);
        assert!(matches!(
            c.resolve("Submarine"),
            Err(CatalogError::UnknownAgentType { .. })
        ));
    }
}
