//! The synchronization seam between the client and the simulator.

use std::time::Duration;

use crate::error::HandshakeError;

/// One side of the per-tick release/acquire handshake.
///
/// The client calls [`release`](Handshake::release) once its writes for
/// the tick are complete, then [`acquire`](Handshake::acquire) to block
/// until the simulator has produced the next state. Between the two
/// calls the simulator owns every shared buffer.
///
/// Implemented by the POSIX named-semaphore pair used against a real
/// simulator process, by a channel pair for threaded in-process
/// simulators, and by inline test simulators that do their work inside
/// `acquire`.
pub trait Handshake: Send {
    /// Signal that the client's data for this tick is ready.
    fn release(&mut self) -> Result<(), HandshakeError>;

    /// Block until the simulator signals back.
    ///
    /// `None` waits without bound. Expiry of a finite timeout returns
    /// [`HandshakeError::Timeout`]; the tick cannot be retried.
    fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError>;
}

impl<H: Handshake + ?Sized> Handshake for Box<H> {
    fn release(&mut self) -> Result<(), HandshakeError> {
        (**self).release()
    }

    fn acquire(&mut self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
        (**self).acquire(timeout)
    }
}
