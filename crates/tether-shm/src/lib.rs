//! Named shared-memory regions shared with the simulator process.
//!
//! A region is a file `{root}/{prefix}{uuid}_{name}` mapped into this
//! process. The simulator maps the same file, so the name is the entire
//! contract: no negotiation happens beyond deriving identical names from
//! identical scenario data.
//!
//! # Ownership model
//!
//! [`RegionManager`] owns every region it maps and unlinks them at
//! [`release_all()`](RegionManager::release_all) or drop. Callers get
//! one of two handle types, chosen by which side writes the buffer:
//!
//! - [`ClientBuffer`]: written by this process (commands, actions,
//!   teleport requests, flags).
//! - [`SimBuffer`]: written by the simulator (sensor data). Exposes only
//!   reads.
//!
//! The split is the only write path: there is no "write any buffer"
//! entry point.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod naming;
mod raw;
pub mod region;

pub use buffer::{ClientBuffer, SimBuffer};
pub use config::ShmConfig;
pub use error::ShmError;
pub use region::RegionManager;
