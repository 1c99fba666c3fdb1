//! Device records and id allocation.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use tether_core::{DeviceId, TickId};
use tether_shm::SimBuffer;

use crate::error::CommsError;
use crate::mailbox::Mailbox;

/// Agent and sensor a device is mounted on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceEndpoint {
    /// Owning agent.
    pub agent: String,
    /// Sensor name on that agent.
    pub sensor: String,
}

impl DeviceEndpoint {
    /// Endpoint for `agent`/`sensor`.
    pub fn new(agent: impl Into<String>, sensor: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            sensor: sensor.into(),
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent, self.sensor)
    }
}

/// Delivery status of a device's last transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Nothing in flight.
    Idle,
    /// At least one target has not consumed the transmission yet.
    Transmitting,
}

/// What a sender left in a receiver's inbox.
#[derive(Clone, Debug)]
pub(crate) struct Inbound<K> {
    pub(crate) from: DeviceId,
    pub(crate) kind: K,
    pub(crate) data: Option<serde_json::Value>,
}

pub(crate) struct Device<K, M> {
    pub(crate) endpoint: DeviceEndpoint,
    pub(crate) buffer: SimBuffer,
    /// Target id -> tick the transmission was sent on.
    pub(crate) pending: IndexMap<DeviceId, TickId>,
    pub(crate) inbox: Option<Inbound<K>>,
    pub(crate) delivered: Mailbox<M>,
}

impl<K, M> Device<K, M> {
    pub(crate) fn status(&self) -> DeviceStatus {
        if self.pending.is_empty() {
            DeviceStatus::Idle
        } else {
            DeviceStatus::Transmitting
        }
    }
}

/// Devices of one kind, keyed by id.
pub(crate) struct DeviceTable<K, M> {
    kind: &'static str,
    pub(crate) devices: BTreeMap<DeviceId, Device<K, M>>,
}

impl<K, M> DeviceTable<K, M> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            devices: BTreeMap::new(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a device, honoring `explicit` if it is free.
    pub(crate) fn add(
        &mut self,
        explicit: Option<DeviceId>,
        endpoint: DeviceEndpoint,
        buffer: SimBuffer,
    ) -> Result<DeviceId, CommsError> {
        let id = match explicit {
            Some(id) => {
                self.check_free(id)?;
                id
            }
            None => self.next_free(),
        };
        self.devices.insert(
            id,
            Device {
                endpoint,
                buffer,
                pending: IndexMap::new(),
                inbox: None,
                delivered: Mailbox::new(),
            },
        );
        Ok(id)
    }

    /// Fail with [`CommsError::DuplicateDeviceId`] if `id` is taken.
    pub(crate) fn check_free(&self, id: DeviceId) -> Result<(), CommsError> {
        match self.devices.get(&id) {
            Some(existing) => Err(CommsError::DuplicateDeviceId {
                kind: self.kind,
                id,
                agent: existing.endpoint.agent.clone(),
                sensor: existing.endpoint.sensor.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Smallest id not in use: 0 for an empty table, otherwise the first
    /// gap in `0..=max+1`.
    pub(crate) fn next_free(&self) -> DeviceId {
        let mut candidate = 0u32;
        for id in self.devices.keys() {
            if id.0 != candidate {
                break;
            }
            candidate += 1;
        }
        DeviceId(candidate)
    }

    pub(crate) fn get(&self, id: DeviceId) -> Result<&Device<K, M>, CommsError> {
        self.devices.get(&id).ok_or(CommsError::UnknownDevice {
            kind: self.kind,
            id,
        })
    }

    pub(crate) fn get_mut(&mut self, id: DeviceId) -> Result<&mut Device<K, M>, CommsError> {
        let kind = self.kind;
        self.devices
            .get_mut(&id)
            .ok_or(CommsError::UnknownDevice { kind, id })
    }

    pub(crate) fn remove(&mut self, id: DeviceId) -> bool {
        if self.devices.remove(&id).is_none() {
            return false;
        }
        for d in self.devices.values_mut() {
            d.pending.shift_remove(&id);
            if d.inbox.as_ref().is_some_and(|i| i.from == id) {
                d.inbox = None;
            }
        }
        true
    }

    pub(crate) fn find(&self, endpoint: &DeviceEndpoint) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, d)| &d.endpoint == endpoint)
            .map(|(id, _)| *id)
    }

    pub(crate) fn ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Drop pending targets sent more than `ttl` ticks before `now`.
    /// Returns `(sender, target)` pairs that expired.
    pub(crate) fn expire(&mut self, now: TickId, ttl: u64) -> Vec<(DeviceId, DeviceId)> {
        let mut expired = Vec::new();
        for (sender, d) in self.devices.iter_mut() {
            d.pending.retain(|target, sent| {
                let keep = now.0.saturating_sub(sent.0) <= ttl;
                if !keep {
                    expired.push((*sender, *target));
                }
                keep
            });
        }
        for (sender, target) in &expired {
            if let Some(t) = self.devices.get_mut(target) {
                if t.inbox.as_ref().is_some_and(|i| i.from == *sender) {
                    t.inbox = None;
                }
            }
        }
        expired
    }

    pub(crate) fn clear_delivered(&mut self) {
        for d in self.devices.values_mut() {
            d.delivered.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{BufferSpec, ElementType};
    use tether_shm::{RegionManager, ShmConfig};

    fn table(dir: &tempfile::TempDir) -> (RegionManager, DeviceTable<(), ()>) {
        let regions = RegionManager::new(ShmConfig::with_root(dir.path()), "dev").unwrap();
        (regions, DeviceTable::new("beacon"))
    }

    fn buffer(regions: &mut RegionManager, name: &str) -> SimBuffer {
        regions
            .allocate_sim(name, BufferSpec::vector(4, ElementType::F32))
            .unwrap()
    }

    #[test]
    fn auto_ids_fill_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let (mut regions, mut t) = table(&dir);
        assert_eq!(t.next_free(), DeviceId(0));
        let b = buffer(&mut regions, "a");
        t.add(Some(DeviceId(0)), DeviceEndpoint::new("a", "s"), b.clone()).unwrap();
        t.add(Some(DeviceId(2)), DeviceEndpoint::new("b", "s"), b.clone()).unwrap();
        assert_eq!(t.next_free(), DeviceId(1));
        t.add(None, DeviceEndpoint::new("c", "s"), b.clone()).unwrap();
        assert_eq!(t.next_free(), DeviceId(3));
    }

    #[test]
    fn explicit_collision_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut regions, mut t) = table(&dir);
        let b = buffer(&mut regions, "a");
        t.add(Some(DeviceId(4)), DeviceEndpoint::new("a", "s"), b.clone()).unwrap();
        match t.add(Some(DeviceId(4)), DeviceEndpoint::new("b", "s"), b) {
            Err(CommsError::DuplicateDeviceId { id, agent, .. }) => {
                assert_eq!(id, DeviceId(4));
                assert_eq!(agent, "a");
            }
            other => panic!("expected DuplicateDeviceId, got {other:?}"),
        }
        assert!(t.check_free(DeviceId(5)).is_ok());
        assert!(t.check_free(DeviceId(4)).is_err());
        assert_eq!(t.ids(), vec![DeviceId(4)]);
    }

    #[test]
    fn expire_drops_old_targets() {
        let dir = tempfile::tempdir().unwrap();
        let (mut regions, mut t) = table(&dir);
        let b = buffer(&mut regions, "a");
        let a = t.add(None, DeviceEndpoint::new("a", "s"), b.clone()).unwrap();
        let c = t.add(None, DeviceEndpoint::new("c", "s"), b).unwrap();
        t.get_mut(a).unwrap().pending.insert(c, TickId(10));
        assert!(t.expire(TickId(15), 5).is_empty());
        assert_eq!(t.expire(TickId(16), 5), vec![(a, c)]);
        assert_eq!(t.get(a).unwrap().status(), DeviceStatus::Idle);
    }
}
