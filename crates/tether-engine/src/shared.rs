//! Thread-shareable environment handle.
//!
//! An [`Environment`] drives a single simulator in lockstep, so callers
//! on several threads must take turns. [`SharedEnvironment`] never
//! queues them: a call made while another is in flight fails at once
//! with [`EnvError::Busy`].

use std::sync::Arc;

use parking_lot::Mutex;
use tether_comms::{MessageType, SendOutcome};
use tether_core::{DeviceId, Recipient, TickId};

use crate::environment::Environment;
use crate::error::EnvError;
use crate::state::StateSnapshot;

/// Cloneable handle to one [`Environment`].
#[derive(Clone)]
pub struct SharedEnvironment {
    inner: Arc<Mutex<Environment>>,
}

impl SharedEnvironment {
    /// Wrap an environment.
    pub fn new(env: Environment) -> Self {
        Self {
            inner: Arc::new(Mutex::new(env)),
        }
    }

    /// Run `f` with exclusive access, or fail if another call holds it.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut Environment) -> Result<R, EnvError>,
    ) -> Result<R, EnvError> {
        let mut env = self.inner.try_lock().ok_or(EnvError::Busy)?;
        f(&mut env)
    }

    /// [`Environment::reset`], returning an owned snapshot.
    pub fn reset(&self) -> Result<StateSnapshot<'static>, EnvError> {
        self.with(|env| env.reset().map(StateSnapshot::into_owned))
    }

    /// [`Environment::step`], returning an owned snapshot.
    pub fn step(&self, action: &[f32], ticks: u32) -> Result<StateSnapshot<'static>, EnvError> {
        self.with(|env| env.step(action, ticks).map(StateSnapshot::into_owned))
    }

    /// [`Environment::tick`], returning an owned snapshot.
    pub fn tick(&self, ticks: u32) -> Result<StateSnapshot<'static>, EnvError> {
        self.with(|env| env.tick(ticks).map(StateSnapshot::into_owned))
    }

    /// [`Environment::act`].
    pub fn act(&self, agent: &str, action: &[f32]) -> Result<(), EnvError> {
        self.with(|env| env.act(agent, action))
    }

    /// [`Environment::send_acoustic_message`].
    pub fn send_acoustic_message(
        &self,
        from: DeviceId,
        to: impl Into<Recipient>,
        kind: MessageType,
        data: Option<serde_json::Value>,
    ) -> Result<SendOutcome, EnvError> {
        let to = to.into();
        self.with(|env| env.send_acoustic_message(from, to, kind, data))
    }

    /// [`Environment::send_optical_message`].
    pub fn send_optical_message(
        &self,
        from: DeviceId,
        to: impl Into<Recipient>,
        data: Option<serde_json::Value>,
    ) -> Result<SendOutcome, EnvError> {
        let to = to.into();
        self.with(|env| env.send_optical_message(from, to, data))
    }

    /// Ticks completed.
    pub fn current_tick(&self) -> Result<TickId, EnvError> {
        self.with(|env| Ok(env.current_tick()))
    }

    /// [`Environment::close`].
    pub fn close(&self) -> Result<(), EnvError> {
        self.with(|env| {
            env.close();
            Ok(())
        })
    }
}

impl std::fmt::Debug for SharedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEnvironment")
            .field("handles", &Arc::strong_count(&self.inner))
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

// Compile-time assertion: the handle crosses threads.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<SharedEnvironment>();
    }
    let _ = check;
};
