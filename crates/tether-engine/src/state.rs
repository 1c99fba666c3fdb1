//! State snapshots.
//!
//! A [`StateSnapshot`] always maps agent name to sensor map, whatever the
//! agent count; [`StateSnapshot::single`] and
//! [`StateSnapshot::main_agent`] cover the one-agent case. A sensor that
//! has no sample this tick is absent from its agent's map.
//!
//! In [`StateMode::ZeroCopy`] the sensor values borrow the shared
//! buffers and so the environment: the snapshot must be dropped before
//! the next tick. [`StateSnapshot::into_owned`] detaches it.

use std::borrow::Cow;

use indexmap::IndexMap;
use tether_comms::{AcousticMessage, DeviceEndpoint, MessagingRegistry, OpticalMessage};
use tether_core::{ElementType, SensorRole, Shape, TickId};
use tether_shm::SimBuffer;

use crate::config::StateMode;
use crate::registry::AgentRegistry;

// ── SensorData ────────────────────────────────────────────────────

/// One sensor's sample.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorData<'a> {
    /// `f32` elements, row-major in `shape`.
    F32 {
        /// Dimensions.
        shape: Shape,
        /// Elements.
        values: Cow<'a, [f32]>,
    },
    /// `f64` elements.
    F64 {
        /// Dimensions.
        shape: Shape,
        /// Elements.
        values: Cow<'a, [f64]>,
    },
    /// `i32` elements.
    I32 {
        /// Dimensions.
        shape: Shape,
        /// Elements.
        values: Cow<'a, [i32]>,
    },
    /// Byte elements (`Bool`, `U8`, `I8`), e.g. camera RGBA.
    Bytes {
        /// Element interpretation.
        element: ElementType,
        /// Dimensions.
        shape: Shape,
        /// Elements.
        values: Cow<'a, [u8]>,
    },
    /// A message an acoustic beacon received this tick.
    Acoustic(AcousticMessage),
    /// A message an optical modem received this tick.
    Optical(OpticalMessage),
}

impl<'a> SensorData<'a> {
    fn from_buffer(buffer: &'a SimBuffer, mode: StateMode) -> Self {
        let spec = buffer.spec();
        let shape = spec.shape.clone();
        let borrow = mode == StateMode::ZeroCopy;
        match spec.element {
            ElementType::F32 => SensorData::F32 {
                shape,
                values: cow(buffer.as_f32().unwrap_or_default(), borrow),
            },
            ElementType::F64 => SensorData::F64 {
                shape,
                values: cow(buffer.as_f64().unwrap_or_default(), borrow),
            },
            ElementType::I32 => SensorData::I32 {
                shape,
                values: cow(buffer.as_i32().unwrap_or_default(), borrow),
            },
            element @ (ElementType::Bool | ElementType::U8 | ElementType::I8) => SensorData::Bytes {
                element,
                shape,
                values: cow(buffer.as_bytes(), borrow),
            },
        }
    }

    /// The elements as `f32`, for float sensors.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            SensorData::F32 { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The elements as bytes, for byte sensors.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SensorData::Bytes { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The acoustic message, for beacons.
    pub fn as_acoustic(&self) -> Option<&AcousticMessage> {
        match self {
            SensorData::Acoustic(m) => Some(m),
            _ => None,
        }
    }

    /// The optical message, for modems.
    pub fn as_optical(&self) -> Option<&OpticalMessage> {
        match self {
            SensorData::Optical(m) => Some(m),
            _ => None,
        }
    }

    /// Buffer dimensions; `None` for messages.
    pub fn shape(&self) -> Option<&Shape> {
        match self {
            SensorData::F32 { shape, .. }
            | SensorData::F64 { shape, .. }
            | SensorData::I32 { shape, .. }
            | SensorData::Bytes { shape, .. } => Some(shape),
            SensorData::Acoustic(_) | SensorData::Optical(_) => None,
        }
    }

    /// `true` if the values alias a shared buffer.
    pub fn is_borrowed(&self) -> bool {
        match self {
            SensorData::F32 { values, .. } => matches!(values, Cow::Borrowed(_)),
            SensorData::F64 { values, .. } => matches!(values, Cow::Borrowed(_)),
            SensorData::I32 { values, .. } => matches!(values, Cow::Borrowed(_)),
            SensorData::Bytes { values, .. } => matches!(values, Cow::Borrowed(_)),
            SensorData::Acoustic(_) | SensorData::Optical(_) => false,
        }
    }

    /// Copy any borrowed values.
    pub fn into_owned(self) -> SensorData<'static> {
        match self {
            SensorData::F32 { shape, values } => SensorData::F32 {
                shape,
                values: Cow::Owned(values.into_owned()),
            },
            SensorData::F64 { shape, values } => SensorData::F64 {
                shape,
                values: Cow::Owned(values.into_owned()),
            },
            SensorData::I32 { shape, values } => SensorData::I32 {
                shape,
                values: Cow::Owned(values.into_owned()),
            },
            SensorData::Bytes {
                element,
                shape,
                values,
            } => SensorData::Bytes {
                element,
                shape,
                values: Cow::Owned(values.into_owned()),
            },
            SensorData::Acoustic(m) => SensorData::Acoustic(m),
            SensorData::Optical(m) => SensorData::Optical(m),
        }
    }
}

fn cow<T: Clone>(values: &[T], borrow: bool) -> Cow<'_, [T]> {
    if borrow {
        Cow::Borrowed(values)
    } else {
        Cow::Owned(values.to_vec())
    }
}

// ── Snapshots ─────────────────────────────────────────────────────

/// One agent's published sensors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentState<'a> {
    /// Sensor name to sample, in attachment order.
    pub sensors: IndexMap<String, SensorData<'a>>,
}

impl<'a> AgentState<'a> {
    /// The sample of `sensor`, if it published this tick.
    pub fn get(&self, sensor: &str) -> Option<&SensorData<'a>> {
        self.sensors.get(sensor)
    }

    /// Whether `sensor` published this tick.
    pub fn contains(&self, sensor: &str) -> bool {
        self.sensors.contains_key(sensor)
    }

    fn into_owned(self) -> AgentState<'static> {
        AgentState {
            sensors: self
                .sensors
                .into_iter()
                .map(|(k, v)| (k, v.into_owned()))
                .collect(),
        }
    }
}

/// State after a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSnapshot<'a> {
    /// Ticks completed.
    pub tick: TickId,
    /// Simulated seconds elapsed.
    pub time: f64,
    /// Agent name to published sensors, in spawn order.
    pub agents: IndexMap<String, AgentState<'a>>,
    /// Name of the main agent.
    pub main_agent: Option<String>,
    /// Reward from the main agent's task sensor.
    pub reward: Option<f32>,
    /// Terminal flag from the main agent's task sensor.
    pub terminal: Option<bool>,
}

impl<'a> StateSnapshot<'a> {
    /// The only agent, if there is exactly one.
    pub fn single(&self) -> Option<&AgentState<'a>> {
        if self.agents.len() == 1 {
            self.agents.values().next()
        } else {
            None
        }
    }

    /// Look up an agent.
    pub fn agent(&self, name: &str) -> Option<&AgentState<'a>> {
        self.agents.get(name)
    }

    /// The main agent's sensors.
    pub fn main_agent(&self) -> Option<&AgentState<'a>> {
        self.main_agent.as_deref().and_then(|n| self.agents.get(n))
    }

    /// Copy every borrowed value.
    pub fn into_owned(self) -> StateSnapshot<'static> {
        StateSnapshot {
            tick: self.tick,
            time: self.time,
            agents: self
                .agents
                .into_iter()
                .map(|(k, v)| (k, v.into_owned()))
                .collect(),
            main_agent: self.main_agent,
            reward: self.reward,
            terminal: self.terminal,
        }
    }
}

// ── Capture ───────────────────────────────────────────────────────

/// Messages taken from the messaging mailboxes for one snapshot.
#[derive(Debug, Default)]
pub(crate) struct Deliveries {
    by_endpoint: IndexMap<DeviceEndpoint, SensorData<'static>>,
}

impl Deliveries {
    /// Take every message delivered this tick. Each is returned once.
    pub(crate) fn take(agents: &AgentRegistry, messaging: &mut MessagingRegistry) -> Self {
        let mut by_endpoint = IndexMap::new();
        for agent in agents.iter() {
            for sensor in agent.sensors() {
                let endpoint = DeviceEndpoint::new(agent.name(), sensor.name());
                let data = match sensor.descriptor().role {
                    SensorRole::AcousticBeacon => messaging
                        .beacon_at(&endpoint)
                        .and_then(|id| messaging.take_acoustic(id))
                        .map(SensorData::Acoustic),
                    SensorRole::OpticalModem => messaging
                        .modem_at(&endpoint)
                        .and_then(|id| messaging.take_optical(id))
                        .map(SensorData::Optical),
                    SensorRole::Plain | SensorRole::Task => None,
                };
                if let Some(data) = data {
                    by_endpoint.insert(endpoint, data);
                }
            }
        }
        Self { by_endpoint }
    }
}

/// Assemble the snapshot for the tick just completed.
pub(crate) fn capture(
    tick: TickId,
    ticks_per_sec: u32,
    agents: &AgentRegistry,
    mut deliveries: Deliveries,
    mode: StateMode,
) -> StateSnapshot<'_> {
    let task_agent = agents
        .main()
        .or_else(|| (agents.len() == 1).then(|| agents.iter().next()).flatten());
    let mut snapshot = StateSnapshot {
        tick,
        time: tick.seconds(ticks_per_sec),
        main_agent: agents.main().map(|a| a.name().to_string()),
        ..StateSnapshot::default()
    };

    for agent in agents.iter() {
        let mut state = AgentState::default();
        for sensor in agent.sensors() {
            match sensor.descriptor().role {
                SensorRole::AcousticBeacon | SensorRole::OpticalModem => {
                    let endpoint = DeviceEndpoint::new(agent.name(), sensor.name());
                    if let Some(data) = deliveries.by_endpoint.shift_remove(&endpoint) {
                        state.sensors.insert(sensor.name().to_string(), data);
                    }
                }
                SensorRole::Plain | SensorRole::Task => {
                    if !sensor.is_published() {
                        continue;
                    }
                    let data = SensorData::from_buffer(sensor.buffer(), mode);
                    let is_task_source =
                        task_agent.is_some_and(|a| a.name() == agent.name()) && snapshot.reward.is_none();
                    if sensor.descriptor().role == SensorRole::Task && is_task_source {
                        if let Some(&[reward, terminal]) = data.as_f32() {
                            snapshot.reward = Some(reward);
                            snapshot.terminal = Some(terminal != 0.0);
                        }
                    }
                    state.sensors.insert(sensor.name().to_string(), data);
                }
            }
        }
        snapshot.agents.insert(agent.name().to_string(), state);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::BufferSpec;

    #[test]
    fn single_only_with_one_agent() {
        let mut s = StateSnapshot::default();
        assert!(s.single().is_none());
        s.agents.insert("a".into(), AgentState::default());
        assert!(s.single().is_some());
        s.agents.insert("b".into(), AgentState::default());
        assert!(s.single().is_none());
        assert!(s.agent("b").is_some());
    }

    #[test]
    fn into_owned_detaches() {
        let values = [1.0f32, 2.0];
        let data = SensorData::F32 {
            shape: BufferSpec::vector(2, ElementType::F32).shape,
            values: Cow::Borrowed(&values),
        };
        assert!(data.is_borrowed());
        let owned = data.into_owned();
        assert!(!owned.is_borrowed());
        assert_eq!(owned.as_f32(), Some(&[1.0, 2.0][..]));
        assert_eq!(owned.shape().map(|s| s.as_slice()), Some(&[2usize][..]));
    }
}
