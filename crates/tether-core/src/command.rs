//! The command payload model.
//!
//! Every non-action interaction with the simulator travels as a
//! [`CommandPayload`]: a wire type name plus an ordered parameter list.
//! Parameter order is part of the simulator's parser contract, so
//! [`CommandPayload::params`] is the single place that fixes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;

/// A single command parameter.
///
/// Serialized untagged, so integers stay integers on the wire. When
/// deserializing, integer literals decode as [`Param::Int`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// Integer parameter.
    Int(i64),
    /// Floating-point parameter.
    Float(f64),
    /// String parameter.
    Text(String),
}

impl Param {
    /// `false` for NaN or infinite floats.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// ── Debug draw / prop vocabularies ────────────────────────────────

/// Shape drawn by a `DebugDraw` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugDrawKind {
    /// Line segment from start to end.
    Line = 0,
    /// Arrow from start to end.
    Arrow = 1,
    /// Box with center `start` and half-extent `end`.
    Box = 2,
    /// Point at `start`.
    Point = 3,
}

/// Primitive shape for `SpawnProp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    /// Cube.
    Box,
    /// Sphere.
    Sphere,
    /// Cylinder.
    Cylinder,
    /// Cone.
    Cone,
}

impl PropKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Sphere => "sphere",
            Self::Cylinder => "cylinder",
            Self::Cone => "cone",
        }
    }
}

impl FromStr for PropKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "box" => Ok(Self::Box),
            "sphere" => Ok(Self::Sphere),
            "cylinder" => Ok(Self::Cylinder),
            "cone" => Ok(Self::Cone),
            _ => Err(CatalogError::UnknownProp {
                name: s.to_string(),
            }),
        }
    }
}

/// Surface material for `SpawnProp`. `Default` leaves the engine's choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Material {
    /// Engine default (empty string on the wire).
    #[default]
    Default,
    /// White.
    White,
    /// Gold.
    Gold,
    /// Cobblestone.
    Cobblestone,
    /// Brick.
    Brick,
    /// Wood.
    Wood,
    /// Grass.
    Grass,
    /// Steel.
    Steel,
    /// Black.
    Black,
}

impl Material {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "",
            Self::White => "white",
            Self::Gold => "gold",
            Self::Cobblestone => "cobblestone",
            Self::Brick => "brick",
            Self::Wood => "wood",
            Self::Grass => "grass",
            Self::Steel => "steel",
            Self::Black => "black",
        }
    }
}

impl FromStr for Material {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let m = match s.to_ascii_lowercase().as_str() {
            "" => Self::Default,
            "white" => Self::White,
            "gold" => Self::Gold,
            "cobblestone" => Self::Cobblestone,
            "brick" => Self::Brick,
            "wood" => Self::Wood,
            "grass" => Self::Grass,
            "steel" => Self::Steel,
            "black" => Self::Black,
            _ => {
                return Err(CatalogError::UnknownMaterial {
                    name: s.to_string(),
                })
            }
        };
        Ok(m)
    }
}

// ── CommandPayload ────────────────────────────────────────────────

/// Every command the simulator understands.
///
/// # Examples
///
/// ```
/// use tether_core::{CommandPayload, Param};
///
/// let cmd = CommandPayload::RemoveSensor {
///     agent: "auv0".into(),
///     sensor: "DVLSensor".into(),
/// };
/// assert_eq!(cmd.type_name(), "RemoveSensor");
/// assert_eq!(cmd.params(), vec![Param::from("auv0"), Param::from("DVLSensor")]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum CommandPayload {
    /// Spawn an agent into the world.
    SpawnAgent {
        /// World location.
        location: [f64; 3],
        /// Roll, pitch, yaw in degrees.
        rotation: [f64; 3],
        /// Catalog agent type, e.g. `HoveringAUV`.
        agent_type: String,
        /// Unique agent name; prefixes all of the agent's buffers.
        name: String,
        /// Whether the viewport follows this agent.
        is_main: bool,
    },
    /// Draw a debug primitive for one frame.
    DebugDraw {
        /// Primitive kind.
        kind: DebugDrawKind,
        /// Start point (or center / location).
        start: [f64; 3],
        /// End point (or extent; zero for points).
        end: [f64; 3],
        /// RGB color, 0-255 per channel.
        color: [u8; 3],
        /// Line thickness or point size.
        thickness: f64,
    },
    /// Move the viewport camera.
    TeleportCamera {
        /// Camera location.
        location: [f64; 3],
        /// Camera rotation in degrees.
        rotation: [f64; 3],
    },
    /// Attach a sensor to an agent.
    AddSensor {
        /// Owning agent.
        agent: String,
        /// Sensor name, unique per agent.
        sensor: String,
        /// Catalog sensor type.
        sensor_type: String,
        /// Sensor configuration block as compact JSON.
        config: String,
        /// Socket on the agent's mesh, empty for the root.
        socket: String,
        /// Offset from the socket.
        location: [f64; 3],
        /// Rotation relative to the socket in degrees.
        rotation: [f64; 3],
    },
    /// Detach a sensor.
    RemoveSensor {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
    },
    /// Rotate an attached sensor.
    RotateSensor {
        /// Owning agent.
        agent: String,
        /// Sensor name.
        sensor: String,
        /// New rotation in degrees.
        rotation: [f64; 3],
    },
    /// Enable or disable viewport rendering.
    RenderViewport {
        /// `true` to render.
        render: bool,
    },
    /// Set render quality, 0 (lowest) to 3 (highest).
    RenderQuality {
        /// Quality level.
        quality: u8,
    },
    /// Change how many ticks an RGB camera waits between captures.
    RgbCameraRate {
        /// Owning agent.
        agent: String,
        /// Camera sensor name.
        sensor: String,
        /// Ticks between captures, at least 1.
        ticks_per_capture: u32,
    },
    /// Start an acoustic transmission between two beacons.
    SendAcousticMessage {
        /// Sending agent.
        from_agent: String,
        /// Sending beacon sensor.
        from_sensor: String,
        /// Receiving agent.
        to_agent: String,
        /// Receiving beacon sensor.
        to_sensor: String,
    },
    /// Start an optical transmission between two modems.
    SendOpticalMessage {
        /// Sending agent.
        from_agent: String,
        /// Sending modem sensor.
        from_sensor: String,
        /// Receiving agent.
        to_agent: String,
        /// Receiving modem sensor.
        to_sensor: String,
    },
    /// World-specific command, interpreted by the loaded world.
    Custom {
        /// Command name.
        name: String,
        /// Numeric parameters.
        numbers: Vec<f64>,
        /// String parameters.
        strings: Vec<String>,
    },
}

impl CommandPayload {
    /// `SpawnProp` world command.
    pub fn spawn_prop(
        kind: PropKind,
        location: [f64; 3],
        rotation: [f64; 3],
        scale: [f64; 3],
        sim_physics: bool,
        material: Material,
        tag: &str,
    ) -> Self {
        let mut numbers = Vec::with_capacity(10);
        numbers.extend_from_slice(&location);
        numbers.extend_from_slice(&rotation);
        numbers.extend_from_slice(&scale);
        numbers.push(if sim_physics { 1.0 } else { 0.0 });
        Self::Custom {
            name: "SpawnProp".to_string(),
            numbers,
            strings: vec![
                kind.as_str().to_string(),
                material.as_str().to_string(),
                tag.to_string(),
            ],
        }
    }

    /// Name the simulator's parser dispatches on.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SpawnAgent { .. } => "SpawnAgent",
            Self::DebugDraw { .. } => "DebugDraw",
            Self::TeleportCamera { .. } => "TeleportCamera",
            Self::AddSensor { .. } => "AddSensor",
            Self::RemoveSensor { .. } => "RemoveSensor",
            Self::RotateSensor { .. } => "RotateSensor",
            Self::RenderViewport { .. } => "RenderViewport",
            Self::RenderQuality { .. } => "AdjustRenderQuality",
            Self::RgbCameraRate { .. } => "RGBCameraRate",
            Self::SendAcousticMessage { .. } => "SendAcousticMessage",
            Self::SendOpticalMessage { .. } => "SendOpticalMessage",
            Self::Custom { .. } => "CustomCommand",
        }
    }

    /// Ordered parameter list, vectors flattened component by component.
    pub fn params(&self) -> Vec<Param> {
        let mut p = Params::default();
        match self {
            Self::SpawnAgent {
                location,
                rotation,
                agent_type,
                name,
                is_main,
            } => {
                p.vec3(location).vec3(rotation).text(agent_type).text(name);
                p.int(i64::from(*is_main));
            }
            Self::DebugDraw {
                kind,
                start,
                end,
                color,
                thickness,
            } => {
                p.int(*kind as i64).vec3(start).vec3(end);
                for c in color {
                    p.int(i64::from(*c));
                }
                p.float(*thickness);
            }
            Self::TeleportCamera { location, rotation } => {
                p.vec3(location).vec3(rotation);
            }
            Self::AddSensor {
                agent,
                sensor,
                sensor_type,
                config,
                socket,
                location,
                rotation,
            } => {
                p.text(agent).text(sensor).text(sensor_type).text(config).text(socket);
                p.vec3(location).vec3(rotation);
            }
            Self::RemoveSensor { agent, sensor } => {
                p.text(agent).text(sensor);
            }
            Self::RotateSensor {
                agent,
                sensor,
                rotation,
            } => {
                p.text(agent).text(sensor).vec3(rotation);
            }
            Self::RenderViewport { render } => {
                p.int(i64::from(*render));
            }
            Self::RenderQuality { quality } => {
                p.int(i64::from(*quality));
            }
            Self::RgbCameraRate {
                agent,
                sensor,
                ticks_per_capture,
            } => {
                p.text(agent).text(sensor).int(i64::from(*ticks_per_capture));
            }
            Self::SendAcousticMessage {
                from_agent,
                from_sensor,
                to_agent,
                to_sensor,
            }
            | Self::SendOpticalMessage {
                from_agent,
                from_sensor,
                to_agent,
                to_sensor,
            } => {
                p.text(from_agent).text(from_sensor).text(to_agent).text(to_sensor);
            }
            Self::Custom {
                name,
                numbers,
                strings,
            } => {
                p.text(name);
                for n in numbers {
                    p.float(*n);
                }
                for s in strings {
                    p.text(s);
                }
            }
        }
        p.0
    }
}

impl fmt::Display for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Default)]
struct Params(Vec<Param>);

impl Params {
    fn int(&mut self, v: i64) -> &mut Self {
        self.0.push(Param::Int(v));
        self
    }

    fn float(&mut self, v: f64) -> &mut Self {
        self.0.push(Param::Float(v));
        self
    }

    fn vec3(&mut self, v: &[f64; 3]) -> &mut Self {
        self.0.extend(v.iter().map(|x| Param::Float(*x)));
        self
    }

    fn text(&mut self, v: &str) -> &mut Self {
        self.0.push(Param::Text(v.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_agent_parameter_order() {
        let cmd = CommandPayload::SpawnAgent {
            location: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.0, 90.0],
            agent_type: "HoveringAUV".into(),
            name: "auv0".into(),
            is_main: true,
        };
        let params = cmd.params();
        assert_eq!(params.len(), 9);
        assert_eq!(params[0], Param::Float(1.0));
        assert_eq!(params[5], Param::Float(90.0));
        assert_eq!(params[6], Param::from("HoveringAUV"));
        assert_eq!(params[7], Param::from("auv0"));
        assert_eq!(params[8], Param::Int(1));
    }

    #[test]
    fn render_quality_uses_adjust_wire_name() {
        let cmd = CommandPayload::RenderQuality { quality: 2 };
        assert_eq!(cmd.type_name(), "AdjustRenderQuality");
        assert_eq!(cmd.params(), vec![Param::Int(2)]);
    }

    #[test]
    fn debug_draw_flattens_vectors() {
        let cmd = CommandPayload::DebugDraw {
            kind: DebugDrawKind::Arrow,
            start: [0.0; 3],
            end: [1.0, 1.0, 1.0],
            color: [255, 0, 0],
            thickness: 10.0,
        };
        let params = cmd.params();
        assert_eq!(params.len(), 11);
        assert_eq!(params[0], Param::Int(1));
        assert_eq!(params[7], Param::Int(255));
        assert_eq!(params[10], Param::Float(10.0));
    }

    #[test]
    fn custom_command_puts_name_first() {
        let cmd = CommandPayload::Custom {
            name: "SetWeather".into(),
            numbers: vec![0.5],
            strings: vec!["rain".into()],
        };
        assert_eq!(cmd.type_name(), "CustomCommand");
        assert_eq!(
            cmd.params(),
            vec![Param::from("SetWeather"), Param::Float(0.5), Param::from("rain")]
        );
    }

    #[test]
    fn spawn_prop_is_a_custom_command() {
        let cmd = CommandPayload::spawn_prop(
            PropKind::Sphere,
            [1.0, 2.0, 3.0],
            [0.0; 3],
            [2.0; 3],
            true,
            Material::Gold,
            "target",
        );
        match cmd {
            CommandPayload::Custom {
                name,
                numbers,
                strings,
            } => {
                assert_eq!(name, "SpawnProp");
                assert_eq!(numbers.len(), 10);
                assert_eq!(numbers[9], 1.0);
                assert_eq!(strings, vec!["sphere", "gold", "target"]);
            }
            other => panic!("expected Custom, got {other:?}"),
        }
    }

    #[test]
    fn prop_and_material_parse_case_insensitively() {
        assert_eq!("Cone".parse::<PropKind>().unwrap(), PropKind::Cone);
        assert_eq!("".parse::<Material>().unwrap(), Material::Default);
        assert_eq!("STEEL".parse::<Material>().unwrap(), Material::Steel);
        assert!(matches!(
            "pyramid".parse::<PropKind>(),
            Err(CatalogError::UnknownProp { .. })
        ));
        assert!(matches!(
            "jelly".parse::<Material>(),
            Err(CatalogError::UnknownMaterial { .. })
        ));
    }

    #[test]
    fn non_finite_float_is_flagged() {
        assert!(!Param::Float(f64::NAN).is_finite());
        assert!(Param::Int(i64::MAX).is_finite());
    }
}
