//! Domain layer: entities, invariants, and port traits. No I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{OrchestraError, StoreError, UpstreamCategory, UpstreamError};
