//! Logging infrastructure: structured, JSON-capable tracing with rotation
//! and secret scrubbing.

pub mod logger;
pub mod secret_scrubbing;

pub use logger::LoggerImpl;
pub use secret_scrubbing::SecretScrubbingLayer;
