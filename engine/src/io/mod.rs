//! I/O helpers: filesystem state, subprocesses, git and the agent executor.

pub mod command_runner;
pub mod config;
pub mod execution_log;
pub mod executor;
pub mod history_store;
pub mod journey_store;
pub mod jsonl;
pub mod paths;
pub mod plan_store;
pub mod process;
pub mod repository;
pub mod snapshot;
