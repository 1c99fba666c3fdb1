//! Acoustic beacon and optical modem messaging.
//!
//! Devices are sensors attached to agents. The simulator computes the
//! geometry of each transmission (bearing, range, line of sight,
//! propagation delay) and writes the result into the receiver's
//! buffer; this crate turns those buffers into delivered messages.
//!
//! All state lives in one [`MessagingRegistry`] owned by the
//! environment, so several environments in one process never share
//! devices.
//!
//! # Per-tick resolution
//!
//! [`MessagingRegistry::resolve`] runs once per tick after the
//! handshake:
//!
//! 1. Pending targets older than the configured TTL expire.
//! 2. The set of transmitting beacons is captured.
//! 3. Each beacon whose buffer holds no NaN is a candidate receiver.
//!    With exactly one transmitter it consumes that transmitter's
//!    message; with any other count every transmission is dropped.
//! 4. Auto-replies for `MSG_REQ*` are sent after the pass, so they are
//!    flushed on the next tick and never observed by the same pass.
//! 5. Optical transmissions flushed on an earlier tick are delivered if
//!    the receiver's gate byte is set, otherwise lost.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod device;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod registry;

pub use device::{DeviceEndpoint, DeviceStatus};
pub use error::CommsError;
pub use mailbox::Mailbox;
pub use message::{AcousticMessage, MessageType, OpticalMessage};
pub use registry::{MessagingConfig, MessagingRegistry, ResolveReport, SendOutcome};
