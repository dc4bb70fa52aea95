//! Infrastructure layer: concrete adapters for configuration, logging, and
//! persistence. Port traits live in `domain::ports`; this module supplies
//! their SQLite/figment/tracing implementations.

pub mod config;
pub mod database;
pub mod logging;
