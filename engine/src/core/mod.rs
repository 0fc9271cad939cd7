//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod execution;
pub mod intervention;
pub mod journey;
pub mod provenance;
pub mod scheduler;
pub mod timeout_history;
pub mod timeout_policy;
pub mod waypoint;
