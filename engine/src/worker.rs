//! Background execution of one waypoint.
//!
//! The executor runs on a dedicated thread and talks back to the control
//! thread only through the returned [`WorkerHandle`]. The worker gets its own
//! copy of the waypoint; the flight plan never leaves the control thread.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::waypoint::Waypoint;
use crate::io::executor::{AgentExecutor, ExecutionOutcome, ExecutionProgress};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Progress {
        waypoint_id: String,
        progress: ExecutionProgress,
    },
    Finished {
        waypoint_id: String,
        outcome: ExecutionOutcome,
    },
}

#[derive(Debug)]
pub struct WorkerHandle {
    rx: Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Block for the next message. `None` once the worker has gone away.
    pub fn recv(&self) -> Option<WorkerMessage> {
        self.rx.recv().ok()
    }

    /// Poll without blocking. `Ok(None)` means nothing is ready yet.
    pub fn try_recv(&self) -> Result<Option<WorkerMessage>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("execution worker disconnected")),
        }
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("execution worker panicked"))?;
        }
        Ok(())
    }
}

/// Run `executor` for `waypoint` on a new thread.
///
/// Executor errors are reported as [`ExecutionOutcome::Failed`]; the last
/// message on the channel is always `Finished` unless the thread panics.
pub fn spawn_execution(
    executor: Arc<dyn AgentExecutor>,
    waypoint: Waypoint,
    spec: String,
    max_iterations: u32,
) -> Result<WorkerHandle> {
    let (tx, rx) = mpsc::channel::<WorkerMessage>();
    let name = format!("waypoint-{}", waypoint.id);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let waypoint_id = waypoint.id.clone();
            let progress_tx = tx.clone();
            let progress_id = waypoint_id.clone();
            let mut on_progress = move |progress: ExecutionProgress| {
                // The receiver may already be gone if the control thread bailed.
                let _ = progress_tx.send(WorkerMessage::Progress {
                    waypoint_id: progress_id.clone(),
                    progress,
                });
            };
            let outcome = match executor.execute(&waypoint, &spec, max_iterations, &mut on_progress)
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(waypoint_id = %waypoint_id, err = %format!("{err:#}"), "executor error");
                    ExecutionOutcome::Failed(format!("{err:#}"))
                }
            };
            debug!(waypoint_id = %waypoint_id, "execution worker finished");
            let _ = tx.send(WorkerMessage::Finished {
                waypoint_id,
                outcome,
            });
        })
        .context("spawn execution worker")?;
    Ok(WorkerHandle {
        rx,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedExecutor, waypoint};

    fn drain(handle: &WorkerHandle) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = handle.recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn progress_then_finished_arrive_in_order() {
        let executor = Arc::new(ScriptedExecutor::new(vec![ExecutionOutcome::Success]));
        let handle =
            spawn_execution(executor.clone(), waypoint("WP-1"), "spec".to_string(), 4).expect("spawn");
        let messages = drain(&handle);
        handle.join().expect("join");

        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            WorkerMessage::Progress {
                progress: ExecutionProgress::Iteration { max_iterations: 4, .. },
                ..
            }
        ));
        assert_eq!(
            messages[1],
            WorkerMessage::Finished {
                waypoint_id: "WP-1".to_string(),
                outcome: ExecutionOutcome::Success,
            }
        );
        assert_eq!(executor.calls()[0].spec, "spec");
    }

    #[test]
    fn executor_error_becomes_failed_outcome() {
        let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
        let handle = spawn_execution(executor, waypoint("WP-9"), String::new(), 1).expect("spawn");
        let last = drain(&handle).pop().expect("message");
        match last {
            WorkerMessage::Finished {
                outcome: ExecutionOutcome::Failed(reason),
                ..
            } => assert!(reason.contains("no scripted outcome")),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
