//! Waypoint execution engine.
//!
//! A flight plan is an ordered list of waypoints with dependencies. The engine
//! picks the next eligible waypoint, hands it to an agent executor, and turns
//! each outcome into the next step: continue, pause, land, or an intervention
//! that a person (or the headless `--on-error` policy) resolves. Every
//! decision is written to disk so a crashed run can be resumed.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, state machines,
//!   intervention protocol, timeout policy, workspace diffs). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, subprocesses).
//!   Isolated behind traits where tests need fakes.
//!
//! Orchestration modules ([`controller`], [`worker`], [`run`]) coordinate
//! core logic with I/O to implement the CLI commands.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
