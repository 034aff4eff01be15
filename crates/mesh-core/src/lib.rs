//! mesh-core: shared types, wire frames, configuration and errors.
//! All other mesh crates depend on this one.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod wire;

pub use descriptor::ServerDescriptor;
pub use error::{ConnectionError, MeshError};
