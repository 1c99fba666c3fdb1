//! [`Handshake`] implementations.
//!
//! [`SemaphoreHandshake`] talks to a real simulator process through the
//! two named semaphores it creates. [`ChannelHandshake`] pairs with a
//! [`ChannelPeer`] for simulators running on a thread of this process.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tether_core::{Handshake, HandshakeError};

/// Name of the semaphore the client posts when its tick data is ready.
pub fn server_semaphore(uuid: &str) -> String {
    format!("/HOLODECK_SEMAPHORE_SERVER{uuid}")
}

/// Name of the semaphore the simulator posts when a tick is done.
pub fn client_semaphore(uuid: &str) -> String {
    format!("/HOLODECK_SEMAPHORE_CLIENT{uuid}")
}

/// Name of the semaphore a launched simulator posts once loaded.
pub fn loading_semaphore(uuid: &str) -> String {
    format!("/HOLODECK_LOADING_SEM{uuid}")
}

// ── Semaphores ────────────────────────────────────────────────────

#[cfg(unix)]
pub use self::unix::SemaphoreHandshake;

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::semaphore::NamedSemaphore;
    use tether_shm::cleanup::{self, CleanupGuard};
    use tracing::debug;

    /// The `SERVER`/`CLIENT` semaphore pair of one environment.
    pub struct SemaphoreHandshake {
        server: NamedSemaphore,
        client: NamedSemaphore,
        unlink: Option<CleanupGuard>,
    }

    impl SemaphoreHandshake {
        /// Open the pair the simulator created for `uuid`.
        pub fn open(uuid: &str) -> Result<Self, HandshakeError> {
            let server = open(&server_semaphore(uuid))?;
            let client = open(&client_semaphore(uuid))?;
            debug!(uuid, "opened tick semaphores");
            Ok(Self {
                server,
                client,
                unlink: None,
            })
        }

        /// Unlink both names when this handshake drops or the process
        /// exits on a signal. Used when this process launched the
        /// simulator and so owns its lifetime.
        pub fn unlink_on_drop(mut self) -> Self {
            let names = [
                self.server.name().to_string(),
                self.client.name().to_string(),
            ];
            self.unlink = Some(cleanup::register(
                format!("semaphores {}", names.join(", ")),
                move || {
                    for name in &names {
                        let _ = NamedSemaphore::unlink(name);
                    }
                },
            ));
            self
        }
    }

    fn open(name: &str) -> Result<NamedSemaphore, HandshakeError> {
        NamedSemaphore::open(name).map_err(|source| HandshakeError::Os {
            name: name.to_string(),
            source,
        })
    }

    impl Handshake for SemaphoreHandshake {
        fn release(&mut self) -> Result<(), HandshakeError> {
            self.server.post().map_err(|source| HandshakeError::Os {
                name: self.server.name().to_string(),
                source,
            })
        }

        fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
            match self.client.wait(timeout) {
                Ok(true) => Ok(()),
                Ok(false) => Err(HandshakeError::Timeout {
                    timeout: timeout.unwrap_or_default(),
                }),
                Err(source) => Err(HandshakeError::Os {
                    name: self.client.name().to_string(),
                    source,
                }),
            }
        }
    }

    impl Drop for SemaphoreHandshake {
        fn drop(&mut self) {
            if let Some(guard) = self.unlink.take() {
                guard.run_now();
            }
        }
    }

    impl std::fmt::Debug for SemaphoreHandshake {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SemaphoreHandshake")
                .field("server", &self.server.name())
                .field("client", &self.client.name())
                .field("owning", &self.unlink.is_some())
                .finish()
        }
    }
}

// ── Channels ──────────────────────────────────────────────────────

/// Client half of an in-process handshake.
#[derive(Debug)]
pub struct ChannelHandshake {
    release: Sender<()>,
    acquire: Receiver<()>,
}

/// Simulator half of an in-process handshake.
#[derive(Debug)]
pub struct ChannelPeer {
    release: Receiver<()>,
    acquire: Sender<()>,
}

/// Create a connected client/simulator pair.
pub fn channel_pair() -> (ChannelHandshake, ChannelPeer) {
    let (rel_tx, rel_rx) = bounded(1);
    let (acq_tx, acq_rx) = bounded(1);
    (
        ChannelHandshake {
            release: rel_tx,
            acquire: acq_rx,
        },
        ChannelPeer {
            release: rel_rx,
            acquire: acq_tx,
        },
    )
}

impl Handshake for ChannelHandshake {
    fn release(&mut self) -> Result<(), HandshakeError> {
        self.release
            .send(())
            .map_err(|_| HandshakeError::Disconnected)
    }

    fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
        match timeout {
            None => self.acquire.recv().map_err(|_| HandshakeError::Disconnected),
            Some(t) => self.acquire.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => HandshakeError::Timeout { timeout: t },
                RecvTimeoutError::Disconnected => HandshakeError::Disconnected,
            }),
        }
    }
}

impl ChannelPeer {
    /// Block until the client releases. `false` once the client is gone.
    pub fn wait_release(&self) -> bool {
        self.release.recv().is_ok()
    }

    /// Signal the client that a tick is done. `false` once the client is
    /// gone.
    pub fn signal(&self) -> bool {
        self.acquire.send(()).is_ok()
    }
}
