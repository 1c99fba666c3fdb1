//! The tick/handshake engine.
//!
//! One tick is: flush queued commands, release the simulator, acquire
//! it back, count the tick, then let the registry clear consumed flags
//! and advance sensor periods. A failed release or acquire leaves the
//! tick counter untouched; the caller must tear the environment down.

use std::time::{Duration, Instant};

use tether_core::{Handshake, HandshakeError, TickId};
use tether_wire::CommandCenter;
use tracing::{debug, trace};

use crate::config::TimeoutConfig;
use crate::error::EnvError;
use crate::registry::AgentRegistry;

/// When the acquire step may wait without bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Deadline for a normal tick.
    pub tick: Duration,
    /// Length of the unbounded window opened by
    /// [`TickEngine::set_slow_init`].
    pub slow_init_ticks: u64,
    /// Attached to an already-running simulator: never time out.
    pub attached: bool,
}

impl TimeoutPolicy {
    /// Policy for a launched or in-process simulator.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            tick: config.tick,
            slow_init_ticks: config.slow_init_ticks,
            attached: false,
        }
    }

    /// Policy for a simulator someone else started.
    pub fn attached(config: &TimeoutConfig) -> Self {
        Self {
            attached: true,
            ..Self::from_config(config)
        }
    }
}

/// Timing of one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick just completed.
    pub tick: TickId,
    /// Command bytes written this tick (0 when nothing was queued).
    pub flush_bytes: usize,
    /// Time blocked in acquire, in microseconds.
    pub wait_us: u64,
    /// Wall-clock time for the whole tick, in microseconds.
    pub total_us: u64,
}

/// Drives the handshake and owns the tick counter.
pub struct TickEngine {
    handshake: Box<dyn Handshake>,
    policy: TimeoutPolicy,
    tick: TickId,
    slow_until: Option<TickId>,
    last_report: TickReport,
}

impl TickEngine {
    /// Wrap a handshake.
    pub fn new(handshake: Box<dyn Handshake>, policy: TimeoutPolicy) -> Self {
        Self {
            handshake,
            policy,
            tick: TickId::default(),
            slow_until: None,
            last_report: TickReport::default(),
        }
    }

    /// Wait for the simulator's first signal.
    ///
    /// The simulator posts once when its first frame is ready; nothing
    /// may be written before that. Not counted as a tick.
    pub fn synchronize(&mut self) -> Result<(), EnvError> {
        let timeout = self.timeout();
        self.handshake.acquire(timeout)?;
        debug!("simulator synchronized");
        Ok(())
    }

    /// Run one tick.
    pub fn execute_tick(
        &mut self,
        commands: &mut CommandCenter,
        agents: &mut AgentRegistry,
    ) -> Result<TickReport, EnvError> {
        let started = Instant::now();
        let flush_bytes = commands.flush()?;
        let timeout = self.timeout();

        self.handshake.release()?;
        let waiting = Instant::now();
        self.handshake.acquire(timeout)?;
        let wait_us = waiting.elapsed().as_micros() as u64;

        self.tick = self.tick.next();
        commands.acknowledge();
        agents.after_tick();
        agents.advance();

        let report = TickReport {
            tick: self.tick,
            flush_bytes,
            wait_us,
            total_us: started.elapsed().as_micros() as u64,
        };
        trace!(tick = %report.tick, flush_bytes, wait_us, "tick");
        self.last_report = report.clone();
        Ok(report)
    }

    /// Open (or close) the unbounded-wait window for slow sensors,
    /// starting at the current tick.
    pub fn set_slow_init(&mut self, enabled: bool) {
        self.slow_until = enabled.then(|| TickId(self.tick.0 + self.policy.slow_init_ticks));
    }

    /// Deadline for the next acquire.
    pub fn timeout(&self) -> Option<Duration> {
        if self.policy.attached || self.slow_until.is_some_and(|until| self.tick < until) {
            None
        } else {
            Some(self.policy.tick)
        }
    }

    /// Ticks completed.
    pub fn current_tick(&self) -> TickId {
        self.tick
    }

    /// The most recent tick's report.
    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }

    /// The policy in use.
    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Drop the handshake. Every later tick fails with
    /// [`HandshakeError::Disconnected`].
    pub fn close(&mut self) {
        self.handshake = Box::new(Closed);
    }
}

struct Closed;

impl Handshake for Closed {
    fn release(&mut self) -> Result<(), HandshakeError> {
        Err(HandshakeError::Disconnected)
    }

    fn acquire(&mut self, _timeout: Option<Duration>) -> Result<(), HandshakeError> {
        Err(HandshakeError::Disconnected)
    }
}

impl std::fmt::Debug for TickEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickEngine")
            .field("tick", &self.tick)
            .field("policy", &self.policy)
            .field("slow_until", &self.slow_until)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tether_core::CommandPayload;
    use tether_shm::{naming, RegionManager, ShmConfig};
    use tether_wire::DEFAULT_CAPACITY;

    #[derive(Default)]
    struct Log {
        calls: Vec<&'static str>,
        timeouts: Vec<Option<Duration>>,
        fail_acquire: bool,
    }

    struct Scripted(Arc<Mutex<Log>>);

    impl Handshake for Scripted {
        fn release(&mut self) -> Result<(), HandshakeError> {
            self.0.lock().calls.push("release");
            Ok(())
        }

        fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
            let mut log = self.0.lock();
            log.calls.push("acquire");
            log.timeouts.push(timeout);
            if log.fail_acquire {
                return Err(HandshakeError::Timeout {
                    timeout: timeout.unwrap_or_default(),
                });
            }
            Ok(())
        }
    }

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy {
            tick: Duration::from_secs(30),
            slow_init_ticks: 3,
            attached: false,
        }
    }

    struct Rig {
        _dir: tempfile::TempDir,
        regions: RegionManager,
        commands: CommandCenter,
        agents: AgentRegistry,
        log: Arc<Mutex<Log>>,
        engine: TickEngine,
    }

    fn rig(policy: TimeoutPolicy) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut regions = RegionManager::new(ShmConfig::with_root(dir.path()), "tick").unwrap();
        let commands = CommandCenter::new(&mut regions, DEFAULT_CAPACITY).unwrap();
        let log = Arc::new(Mutex::new(Log::default()));
        let engine = TickEngine::new(Box::new(Scripted(log.clone())), policy);
        Rig {
            _dir: dir,
            regions,
            commands,
            agents: AgentRegistry::new(),
            log,
            engine,
        }
    }

    #[test]
    fn tick_releases_then_acquires_and_counts() {
        let mut r = rig(policy());
        r.commands
            .enqueue(CommandPayload::RenderViewport { render: false })
            .unwrap();
        let report = r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap();
        assert_eq!(report.tick, TickId(1));
        assert!(report.flush_bytes > 0);
        assert!(r.commands.is_empty());
        assert!(!r.commands.is_dirty());
        assert_eq!(r.log.lock().calls, vec!["release", "acquire"]);

        let report = r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap();
        assert_eq!(report.flush_bytes, 0);
        assert_eq!(r.engine.current_tick(), TickId(2));
        assert_eq!(r.engine.last_report().tick, TickId(2));
    }

    #[test]
    fn failed_acquire_does_not_count() {
        let mut r = rig(policy());
        r.log.lock().fail_acquire = true;
        let err = r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_fatal());
        assert_eq!(r.engine.current_tick(), TickId(0));
    }

    #[test]
    fn closed_engine_disconnects() {
        let mut r = rig(policy());
        r.engine.close();
        match r.engine.execute_tick(&mut r.commands, &mut r.agents) {
            Err(EnvError::Handshake(HandshakeError::Disconnected)) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn slow_init_window_is_unbounded() {
        let mut r = rig(policy());
        r.engine.set_slow_init(true);
        for _ in 0..5 {
            r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap();
        }
        let secs = Some(Duration::from_secs(30));
        assert_eq!(r.log.lock().timeouts, vec![None, None, None, secs, secs]);
    }

    #[test]
    fn attached_never_times_out() {
        let mut p = policy();
        p.attached = true;
        let mut r = rig(p);
        r.engine.synchronize().unwrap();
        r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap();
        assert_eq!(r.log.lock().timeouts, vec![None, None]);
        assert_eq!(r.engine.current_tick(), TickId(1));
    }

    #[test]
    fn tick_clears_consumed_teleport_flags() {
        let mut r = rig(policy());
        let desc = tether_core::AgentCatalog::builtin().resolve("SphereAgent").unwrap();
        r.agents
            .add_agent(&mut r.regions, "ball", desc, 0, true)
            .unwrap();
        r.agents.teleport("ball", Some([1.0, 0.0, 0.0]), None).unwrap();
        let peer = RegionManager::attach(r.regions.config().clone(), "tick")
            .unwrap()
            .allocate_sim(
                &naming::teleport_flag("ball"),
                tether_core::BufferSpec::vector(1, tether_core::ElementType::U8),
            )
            .unwrap();
        assert_eq!(peer.byte(0), Some(1));
        r.engine.execute_tick(&mut r.commands, &mut r.agents).unwrap();
        assert_eq!(peer.byte(0), Some(0));
    }
}
