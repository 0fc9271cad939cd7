//! Stable exit codes for `waypoints` CLI commands.

/// Command succeeded (for `run`: no waypoint failed).
pub const OK: i32 = 0;
/// A waypoint failed, validation found problems, or the command errored.
pub const FAILED: i32 = 1;
/// `waypoints run` stopped on an intervention under `--on-error abort`.
pub const INTERVENTION: i32 = 2;
