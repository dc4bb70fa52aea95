//! orchestra-core: the concurrency fabric behind a persistent,
//! multi-channel agent orchestrator — dialog queue, background task pool,
//! swarm coordinator, subagent registry, approval queue, and task
//! verifier, wired over a typed event bus and a SQLite-backed store.
//!
//! The concrete LLM transport, chat channel drivers, and MCP tool clients
//! are collaborator traits (`domain::ports`); this crate ships only the
//! fabric around them plus test doubles under `testing` for exercising it
//! without a network dependency.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
