//! Journey persistence (`.waypoints/journey.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::journey::Journey;
use crate::io::paths::write_atomic;

/// Load the journey, or `None` when the project has none yet.
///
/// With `recover`, a journey caught mid-transition is moved to its fallback.
/// The recovered value is returned but not written back.
pub fn load_journey(path: &Path, recover: bool) -> Result<Option<Journey>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let journey: Journey = serde_json::from_str(&contents)
        .with_context(|| format!("parse journey {}", path.display()))?;
    debug!(state = %journey.state, "journey loaded");
    if recover && !journey.is_recoverable() {
        let recovered = journey.recover();
        info!(from = %journey.state, to = %recovered.state, "journey recovered");
        return Ok(Some(recovered));
    }
    Ok(Some(journey))
}

/// Atomically write the journey (temp file + rename).
pub fn save_journey(path: &Path, journey: &Journey) -> Result<()> {
    debug!(path = %path.display(), state = %journey.state, "writing journey");
    let mut buf = serde_json::to_string_pretty(journey).context("serialize journey")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::journey::JourneyState;

    fn journey_at(states: &[JourneyState]) -> Journey {
        let mut journey = Journey::new("demo");
        for state in states {
            journey = journey.transition(*state).expect("valid edge");
        }
        journey
    }

    #[test]
    fn round_trips_with_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journey.json");
        let journey = journey_at(&[JourneyState::SparkEntering, JourneyState::ShapeQa]);

        save_journey(&path, &journey).expect("save");
        let loaded = load_journey(&path, false).expect("load").expect("journey");
        assert_eq!(loaded, journey);
        assert!(
            fs::read_to_string(&path)
                .expect("read")
                .contains("\"shape:qa\"")
        );
    }

    #[test]
    fn load_with_recover_falls_back_from_transient_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journey.json");
        save_journey(&path, &journey_at(&[JourneyState::SparkEntering])).expect("save");

        let raw = load_journey(&path, false).expect("load").expect("journey");
        assert_eq!(raw.state, JourneyState::SparkEntering);
        let recovered = load_journey(&path, true).expect("load").expect("journey");
        assert_eq!(recovered.state, JourneyState::SparkIdle);
        let last = recovered.state_history.last().expect("history");
        assert_eq!(last.reason.as_deref(), Some("recovery"));
    }

    #[test]
    fn missing_file_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(
            load_journey(&temp.path().join("journey.json"), true)
                .expect("load")
                .is_none()
        );
    }
}
