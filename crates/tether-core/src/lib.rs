//! Core types and traits for the Tether simulator client.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! vocabulary shared by the rest of the workspace: identifiers, buffer
//! shape descriptors, the command payload model, the sensor and agent
//! catalogs, error types, and the [`Handshake`] trait.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod catalog;
pub mod command;
pub mod error;
pub mod id;
pub mod traits;

pub use buffer::{BufferSpec, ElementType, Shape};
pub use catalog::{
    AgentCatalog, AgentDescriptor, SensorCatalog, SensorDescriptor, SensorRole,
};
pub use command::{CommandPayload, DebugDrawKind, Material, Param, PropKind};
pub use error::{CatalogError, HandshakeError};
pub use id::{DeviceId, Recipient, TickId};
pub use traits::Handshake;
