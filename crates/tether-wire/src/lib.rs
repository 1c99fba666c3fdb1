//! Command encoding and queueing.
//!
//! Outgoing commands are queued as [`CommandPayload`](tether_core::CommandPayload)s
//! and written once per tick into the shared `command_buffer` as
//!
//! ```text
//! {"commands":[{"type":"SpawnAgent","params":[{"value":0.0},...]},...]}0
//! ```
//!
//! The trailing `0` is the end-of-document sentinel the simulator's
//! parser requires. A separate one-byte `command_bool` buffer tells the
//! simulator whether there is anything to parse this tick.
//!
//! The framed size of the queue is tracked as commands arrive, so a
//! command that would not fit is refused at [`CommandQueue::enqueue`]
//! and the shared buffer is never partially written.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod center;
pub mod encode;
pub mod error;
pub mod queue;

pub use center::{CommandCenter, DEFAULT_CAPACITY};
pub use encode::{decode, encode, WireCommand};
pub use error::WireError;
pub use queue::CommandQueue;
