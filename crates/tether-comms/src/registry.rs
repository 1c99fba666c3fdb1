//! The messaging registry and its per-tick resolution pass.

use serde_json::Value;
use tether_core::{CommandPayload, DeviceId, Recipient, TickId};
use tether_shm::SimBuffer;
use tether_wire::CommandCenter;
use tracing::{debug, warn};

use crate::device::{DeviceEndpoint, DeviceStatus, DeviceTable, Inbound};
use crate::error::CommsError;
use crate::message::{AcousticMessage, MessageType, OpticalMessage};

// ── Config / outcomes ─────────────────────────────────────────────

/// Messaging behavior knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Ticks after which an unconsumed pending target is dropped.
    /// `None` keeps pending targets until consumed or reset.
    /// Default: 300 (ten seconds at 30 ticks per second).
    pub pending_ttl_ticks: Option<u64>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            pending_ttl_ticks: Some(300),
        }
    }
}

/// Result of a send request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Commands were queued for this many targets (0 for a broadcast
    /// with no other devices).
    Sent {
        /// Number of targets.
        targets: usize,
    },
    /// The sender is still transmitting; nothing was queued.
    Busy,
}

/// Counters from one [`MessagingRegistry::resolve`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Acoustic messages delivered.
    pub acoustic_delivered: usize,
    /// Optical messages delivered.
    pub optical_delivered: usize,
    /// Optical transmissions the simulator gated off.
    pub optical_lost: usize,
    /// Passes that dropped transmissions because of a collision (0 or 1).
    pub collisions: usize,
    /// Auto-replies queued.
    pub auto_replies: usize,
    /// Pending targets dropped by the TTL.
    pub expired: usize,
}

// ── MessagingRegistry ─────────────────────────────────────────────

type Beacons = DeviceTable<MessageType, AcousticMessage>;
type Modems = DeviceTable<(), OpticalMessage>;

/// Every beacon and modem of one environment.
pub struct MessagingRegistry {
    config: MessagingConfig,
    beacons: Beacons,
    modems: Modems,
}

impl MessagingRegistry {
    /// An empty registry.
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            beacons: DeviceTable::new("beacon"),
            modems: DeviceTable::new("modem"),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Register an acoustic beacon. `explicit` ids must be free; `None`
    /// takes the smallest unused id.
    pub fn add_beacon(
        &mut self,
        explicit: Option<DeviceId>,
        endpoint: DeviceEndpoint,
        buffer: SimBuffer,
    ) -> Result<DeviceId, CommsError> {
        let id = self.beacons.add(explicit, endpoint, buffer)?;
        debug!(beacon = %id, "registered acoustic beacon");
        Ok(id)
    }

    /// Register an optical modem, with the same id rules as beacons.
    pub fn add_modem(
        &mut self,
        explicit: Option<DeviceId>,
        endpoint: DeviceEndpoint,
        buffer: SimBuffer,
    ) -> Result<DeviceId, CommsError> {
        let id = self.modems.add(explicit, endpoint, buffer)?;
        debug!(modem = %id, "registered optical modem");
        Ok(id)
    }

    /// Check that an explicit beacon id is free, without registering.
    pub fn check_beacon_id(&self, id: DeviceId) -> Result<(), CommsError> {
        self.beacons.check_free(id)
    }

    /// Check that an explicit modem id is free, without registering.
    pub fn check_modem_id(&self, id: DeviceId) -> Result<(), CommsError> {
        self.modems.check_free(id)
    }

    /// Remove whichever device is mounted at `endpoint`. Transmissions to
    /// it are forgotten.
    pub fn remove_endpoint(&mut self, endpoint: &DeviceEndpoint) -> bool {
        let beacon = self.beacons.find(endpoint).is_some_and(|id| self.beacons.remove(id));
        let modem = self.modems.find(endpoint).is_some_and(|id| self.modems.remove(id));
        beacon || modem
    }

    /// Forget every device.
    pub fn clear(&mut self) {
        self.beacons.devices.clear();
        self.modems.devices.clear();
    }

    /// Beacon ids in ascending order.
    pub fn beacon_ids(&self) -> Vec<DeviceId> {
        self.beacons.ids()
    }

    /// Modem ids in ascending order.
    pub fn modem_ids(&self) -> Vec<DeviceId> {
        self.modems.ids()
    }

    /// Beacon mounted at `endpoint`.
    pub fn beacon_at(&self, endpoint: &DeviceEndpoint) -> Option<DeviceId> {
        self.beacons.find(endpoint)
    }

    /// Modem mounted at `endpoint`.
    pub fn modem_at(&self, endpoint: &DeviceEndpoint) -> Option<DeviceId> {
        self.modems.find(endpoint)
    }

    /// Where beacon `id` is mounted.
    pub fn beacon_endpoint(&self, id: DeviceId) -> Option<&DeviceEndpoint> {
        self.beacons.get(id).ok().map(|d| &d.endpoint)
    }

    /// Where modem `id` is mounted.
    pub fn modem_endpoint(&self, id: DeviceId) -> Option<&DeviceEndpoint> {
        self.modems.get(id).ok().map(|d| &d.endpoint)
    }

    /// Status of beacon `id`.
    pub fn beacon_status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.beacons.get(id).ok().map(|d| d.status())
    }

    /// Status of modem `id`.
    pub fn modem_status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.modems.get(id).ok().map(|d| d.status())
    }

    /// Targets beacon `id` is still transmitting to.
    pub fn beacon_pending(&self, id: DeviceId) -> Vec<DeviceId> {
        self.beacons
            .get(id)
            .map(|d| d.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Start an acoustic transmission.
    ///
    /// Queues one `SendAcousticMessage` per target and records each as
    /// pending. A sender that is still transmitting is refused with
    /// [`SendOutcome::Busy`] and nothing is queued.
    ///
    /// # Errors
    ///
    /// [`CommsError::UnknownDevice`] or [`CommsError::SelfAddressed`] for
    /// bad ids, [`CommsError::Wire`] if the command buffer is full. Ids
    /// are checked before anything is queued; on a wire error commands
    /// for earlier targets may already be queued but no pending state
    /// is recorded.
    pub fn send_acoustic(
        &mut self,
        from: DeviceId,
        to: Recipient,
        kind: MessageType,
        data: Option<Value>,
        now: TickId,
        commands: &mut CommandCenter,
    ) -> Result<SendOutcome, CommsError> {
        send(&mut self.beacons, from, to, kind, data, now, commands, |f, t| {
            CommandPayload::SendAcousticMessage {
                from_agent: f.agent.clone(),
                from_sensor: f.sensor.clone(),
                to_agent: t.agent.clone(),
                to_sensor: t.sensor.clone(),
            }
        })
    }

    /// Start an optical transmission. Same rules as
    /// [`send_acoustic`](Self::send_acoustic).
    pub fn send_optical(
        &mut self,
        from: DeviceId,
        to: Recipient,
        data: Option<Value>,
        now: TickId,
        commands: &mut CommandCenter,
    ) -> Result<SendOutcome, CommsError> {
        send(&mut self.modems, from, to, (), data, now, commands, |f, t| {
            CommandPayload::SendOpticalMessage {
                from_agent: f.agent.clone(),
                from_sensor: f.sensor.clone(),
                to_agent: t.agent.clone(),
                to_sensor: t.sensor.clone(),
            }
        })
    }

    /// Take the message beacon `id` received this tick.
    pub fn take_acoustic(&mut self, id: DeviceId) -> Option<AcousticMessage> {
        self.beacons.get_mut(id).ok()?.delivered.try_take()
    }

    /// Take the message modem `id` received this tick.
    pub fn take_optical(&mut self, id: DeviceId) -> Option<OpticalMessage> {
        self.modems.get_mut(id).ok()?.delivered.try_take()
    }

    /// Run the per-tick resolution pass. Call once per tick, after the
    /// handshake, with `now` the tick just completed.
    ///
    /// Messages delivered on an earlier tick and never taken are dropped
    /// first: only this tick's deliveries are visible afterwards.
    pub fn resolve(
        &mut self,
        now: TickId,
        commands: &mut CommandCenter,
    ) -> Result<ResolveReport, CommsError> {
        let mut report = ResolveReport::default();
        self.beacons.clear_delivered();
        self.modems.clear_delivered();

        if let Some(ttl) = self.config.pending_ttl_ticks {
            let beacons = self.beacons.expire(now, ttl);
            let modems = self.modems.expire(now, ttl);
            for (kind, expired) in [("beacon", &beacons), ("modem", &modems)] {
                for (sender, target) in expired {
                    warn!(kind, %sender, %target, ttl, "pending transmission expired");
                }
            }
            report.expired = beacons.len() + modems.len();
        }

        let replies = self.resolve_acoustic(&mut report);
        for (from, to, kind) in replies {
            match self.send_acoustic(from, Recipient::Device(to), kind, None, now, commands)? {
                SendOutcome::Sent { .. } => report.auto_replies += 1,
                SendOutcome::Busy => {
                    warn!(beacon = %from, reply = %kind, "auto-reply dropped, beacon busy")
                }
            }
        }

        self.resolve_optical(now, &mut report);
        Ok(report)
    }

    /// Deliver acoustic messages; returns the auto-replies to send.
    fn resolve_acoustic(
        &mut self,
        report: &mut ResolveReport,
    ) -> Vec<(DeviceId, DeviceId, MessageType)> {
        let transmitting: Vec<DeviceId> = self
            .beacons
            .devices
            .iter()
            .filter(|(_, d)| d.status() == DeviceStatus::Transmitting)
            .map(|(id, _)| *id)
            .collect();
        let receiving: Vec<(DeviceId, [f32; 4])> = self
            .beacons
            .devices
            .iter()
            .filter_map(|(id, d)| read_signal(&d.buffer).map(|s| (*id, s)))
            .collect();

        let mut replies = Vec::new();
        if receiving.is_empty() {
            return replies;
        }
        let sender = match transmitting.as_slice() {
            [one] => *one,
            [] => return replies,
            many => {
                warn!(senders = ?many, "acoustic collision, dropping all transmissions");
                for s in many {
                    if let Ok(d) = self.beacons.get_mut(*s) {
                        d.pending.clear();
                    }
                }
                for d in self.beacons.devices.values_mut() {
                    if d.inbox.as_ref().is_some_and(|i| many.contains(&i.from)) {
                        d.inbox = None;
                    }
                }
                report.collisions = 1;
                return replies;
            }
        };

        for (receiver, signal) in receiving {
            if receiver == sender {
                continue;
            }
            let addressed = self
                .beacons
                .get(receiver)
                .ok()
                .and_then(|d| d.inbox.as_ref())
                .is_some_and(|i| i.from == sender);
            let consumed = addressed
                && self
                    .beacons
                    .get_mut(sender)
                    .is_ok_and(|d| d.pending.shift_remove(&receiver).is_some());
            if !consumed {
                continue;
            }
            let Ok(rx) = self.beacons.get_mut(receiver) else {
                continue;
            };
            let Some(Inbound { from, kind, data }) = rx.inbox.take() else {
                continue;
            };
            debug!(%from, to = %receiver, %kind, "acoustic message delivered");
            if let Some(reply) = kind.auto_reply() {
                replies.push((receiver, from, reply));
            }
            rx.delivered
                .put(AcousticMessage::from_signal(kind, from, data, signal));
            report.acoustic_delivered += 1;
        }
        replies
    }

    fn resolve_optical(&mut self, now: TickId, report: &mut ResolveReport) {
        let due: Vec<(DeviceId, DeviceId)> = self
            .modems
            .devices
            .iter()
            .flat_map(|(sender, d)| {
                d.pending
                    .iter()
                    .filter(|(_, sent)| sent.0 < now.0)
                    .map(move |(target, _)| (*sender, *target))
            })
            .collect();

        for (sender, target) in due {
            if let Ok(d) = self.modems.get_mut(sender) {
                d.pending.shift_remove(&target);
            }
            let Ok(rx) = self.modems.get_mut(target) else {
                continue;
            };
            let gate = rx.buffer.byte(0).is_some_and(|b| b != 0);
            let addressed = rx.inbox.as_ref().is_some_and(|i| i.from == sender);
            if !addressed {
                continue;
            }
            let inbound = rx.inbox.take();
            match inbound {
                Some(i) if gate => {
                    debug!(from = %sender, to = %target, "optical message delivered");
                    rx.delivered.put(OpticalMessage {
                        from: sender,
                        data: i.data,
                    });
                    report.optical_delivered += 1;
                }
                _ => {
                    debug!(from = %sender, to = %target, "optical message out of line of sight");
                    report.optical_lost += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for MessagingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingRegistry")
            .field("beacons", &self.beacons.ids())
            .field("modems", &self.modems.ids())
            .field("config", &self.config)
            .finish()
    }
}

/// `[azimuth, elevation, range, depth]`, or `None` if any element is NaN.
fn read_signal(buffer: &SimBuffer) -> Option<[f32; 4]> {
    if buffer.has_nan() {
        return None;
    }
    match buffer.as_f32()? {
        [a, e, r, d, ..] => Some([*a, *e, *r, *d]),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn send<K: Clone, M>(
    table: &mut DeviceTable<K, M>,
    from: DeviceId,
    to: Recipient,
    kind: K,
    data: Option<Value>,
    now: TickId,
    commands: &mut CommandCenter,
    make: impl Fn(&DeviceEndpoint, &DeviceEndpoint) -> CommandPayload,
) -> Result<SendOutcome, CommsError> {
    let sender = table.get(from)?;
    let targets: Vec<DeviceId> = match to {
        Recipient::All => table.ids().into_iter().filter(|id| *id != from).collect(),
        Recipient::Device(id) if id == from => {
            return Err(CommsError::SelfAddressed {
                kind: table.kind(),
                id,
            })
        }
        Recipient::Device(id) => {
            table.get(id)?;
            vec![id]
        }
    };
    if sender.status() == DeviceStatus::Transmitting {
        warn!(
            kind = table.kind(),
            device = %from,
            pending = sender.pending.len(),
            "send refused, device is still transmitting"
        );
        return Ok(SendOutcome::Busy);
    }

    let origin = sender.endpoint.clone();
    for t in &targets {
        let target = &table.get(*t)?.endpoint;
        commands.enqueue(make(&origin, target))?;
    }
    for t in &targets {
        table.get_mut(*t)?.inbox = Some(Inbound {
            from,
            kind: kind.clone(),
            data: data.clone(),
        });
    }
    let d = table.get_mut(from)?;
    d.pending.extend(targets.iter().map(|t| (*t, now)));
    debug!(kind = table.kind(), device = %from, targets = targets.len(), "transmission queued");
    Ok(SendOutcome::Sent {
        targets: targets.len(),
    })
}
