//! Child process execution with staged timeouts and graduated termination.
//!
//! A run waits up to the warning threshold, then up to the timeout, then sends
//! a terminate signal, waits the grace period, and finally kills. Output is
//! drained concurrently into bounded buffers so a chatty child can never
//! deadlock on a full pipe.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for pipes to close after the child has exited. A
/// grandchild that escaped termination may hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const MIN_REMAINING_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Terminate,
    Kill,
}

impl TerminationSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// Progress notifications emitted while a child is being supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStage {
    Warning { elapsed: Duration },
    Signalled(TerminationSignal),
}

/// Supervision limits for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedTimeout {
    pub timeout: Duration,
    pub warning_after: Option<Duration>,
    pub terminate_grace: Duration,
    /// Place the child in its own process group and signal the whole group.
    pub use_process_group: bool,
}

/// Captured outcome of one supervised run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the child was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub warning_emitted: bool,
    pub signals: Vec<TerminationSignal>,
    pub duration: Duration,
}

/// Spawn `cmd` and supervise it under `limits`.
///
/// Only a launch failure is an error. Timeouts and non-zero exits are
/// reported in the returned [`ProcessOutput`].
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs_f64(), output_limit_bytes))]
pub fn run_supervised(
    mut cmd: Command,
    limits: &StagedTimeout,
    output_limit_bytes: usize,
    mut on_stage: impl FnMut(ProcessStage),
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if limits.use_process_group {
            cmd.process_group(0);
        }
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_buf = Arc::new(Mutex::new(LimitedBuffer::new(output_limit_bytes)));
    let stderr_buf = Arc::new(Mutex::new(LimitedBuffer::new(output_limit_bytes)));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(stdout, Arc::clone(&stdout_buf), done_tx.clone());
    spawn_reader(stderr, Arc::clone(&stderr_buf), done_tx);

    let mut warning_emitted = false;
    let status = match limits.warning_after {
        Some(warning_after) => match child
            .wait_timeout(warning_after)
            .context("wait for command")?
        {
            Some(status) => Some(status),
            None => {
                warning_emitted = true;
                warn!(
                    elapsed_secs = warning_after.as_secs_f64(),
                    "command approaching timeout"
                );
                on_stage(ProcessStage::Warning {
                    elapsed: started.elapsed(),
                });
                let remaining = limits
                    .timeout
                    .saturating_sub(warning_after)
                    .max(MIN_REMAINING_WAIT);
                child.wait_timeout(remaining).context("wait for command")?
            }
        },
        None => child
            .wait_timeout(limits.timeout)
            .context("wait for command")?,
    };

    let mut signals = Vec::new();
    let timed_out = status.is_none();
    let status = match status {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs_f64(),
                "command timed out, terminating"
            );
            escalate(&mut child, limits, &mut signals, &mut on_stage)?
        }
    };

    for _ in 0..2 {
        if done_rx.recv_timeout(DRAIN_TIMEOUT).is_err() {
            warn!("output pipes still open after exit, returning partial output");
            break;
        }
    }
    let (stdout, stdout_truncated) = take_buffer(&stdout_buf)?;
    let (stderr, stderr_truncated) = take_buffer(&stderr_buf)?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let duration = started.elapsed();
    debug!(
        exit_code = ?status.code(),
        timed_out,
        duration_ms = duration.as_millis() as u64,
        "command finished"
    );
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        warning_emitted,
        signals,
        duration,
    })
}

/// Terminate, wait out the grace period, then kill. Signals are only sent
/// (and recorded) while the child is still alive.
fn escalate(
    child: &mut Child,
    limits: &StagedTimeout,
    signals: &mut Vec<TerminationSignal>,
    on_stage: &mut impl FnMut(ProcessStage),
) -> Result<ExitStatus> {
    for signal in [TerminationSignal::Terminate, TerminationSignal::Kill] {
        if let Some(status) = child.try_wait().context("poll command")? {
            return Ok(status);
        }
        match send_signal(child, signal, limits.use_process_group) {
            Ok(()) => {
                signals.push(signal);
                on_stage(ProcessStage::Signalled(signal));
            }
            Err(err) => warn!(signal = signal.as_str(), err = %err, "failed to signal command"),
        }
        if signal == TerminationSignal::Terminate
            && let Some(status) = child
                .wait_timeout(limits.terminate_grace)
                .context("wait for command after terminate")?
        {
            return Ok(status);
        }
    }
    child.wait().context("wait command after kill")
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: TerminationSignal, group: bool) -> Result<()> {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    let sig = match signal {
        TerminationSignal::Terminate => Signal::SIGTERM,
        TerminationSignal::Kill => Signal::SIGKILL,
    };
    let pid = Pid::from_raw(i32::try_from(child.id()).context("pid out of range")?);
    let result = if group { killpg(pid, sig) } else { kill(pid, sig) };
    match result {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(anyhow!("{} failed: {errno}", signal.as_str())),
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: TerminationSignal, _group: bool) -> Result<()> {
    child.kill().context("kill command")
}

#[derive(Debug)]
struct LimitedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: usize,
}

impl LimitedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let remaining = self.limit.saturating_sub(self.data.len());
        let keep = chunk.len().min(remaining);
        self.data.extend_from_slice(&chunk[..keep]);
        self.truncated += chunk.len() - keep;
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    buffer: Arc<Mutex<LimitedBuffer>>,
    done: mpsc::Sender<()>,
) {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match buffer.lock() {
                    Ok(mut buf) => buf.push(&chunk[..n]),
                    Err(_) => break,
                },
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(err = %err, "output reader stopped");
                    break;
                }
            }
        }
        let _ = done.send(());
    });
}

fn take_buffer(buffer: &Arc<Mutex<LimitedBuffer>>) -> Result<(Vec<u8>, usize)> {
    let mut buf = buffer
        .lock()
        .map_err(|_| anyhow!("output reader thread panicked"))?;
    Ok((std::mem::take(&mut buf.data), buf.truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout_ms: u64) -> StagedTimeout {
        StagedTimeout {
            timeout: Duration::from_millis(timeout_ms),
            warning_after: None,
            terminate_grace: Duration::from_millis(500),
            use_process_group: true,
        }
    }

    #[test]
    fn captures_output_and_exit_code() {
        let script = "echo hi; echo oops >&2; exit 3";
        let out = run_supervised(sh(script), &limits(5_000), 1024, |_| {}).expect("run");
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
        assert!(!out.timed_out);
        assert!(out.signals.is_empty());
    }

    #[test]
    fn timeout_sends_terminate_to_group() {
        let mut stages = Vec::new();
        let out = run_supervised(sh("sleep 30"), &limits(200), 1024, |stage| stages.push(stage))
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert_eq!(out.signals, vec![TerminationSignal::Terminate]);
        assert_eq!(
            stages,
            vec![ProcessStage::Signalled(TerminationSignal::Terminate)]
        );
        assert!(out.duration < Duration::from_secs(10));
    }

    #[test]
    fn ignored_terminate_escalates_to_kill() {
        let mut cfg = limits(200);
        cfg.terminate_grace = Duration::from_millis(200);
        let out = run_supervised(
            sh("trap '' TERM; while true; do sleep 0.05; done"),
            &cfg,
            1024,
            |_| {},
        )
        .expect("run");
        assert!(out.timed_out);
        assert_eq!(
            out.signals,
            vec![TerminationSignal::Terminate, TerminationSignal::Kill]
        );
    }

    #[test]
    fn warning_fires_before_completion() {
        let mut cfg = limits(5_000);
        cfg.warning_after = Some(Duration::from_millis(100));
        let mut warned = false;
        let out = run_supervised(sh("sleep 0.4; echo done"), &cfg, 1024, |stage| {
            warned |= matches!(stage, ProcessStage::Warning { .. });
        })
        .expect("run");
        assert!(warned);
        assert!(out.warning_emitted);
        assert!(!out.timed_out);
        assert_eq!(out.exit_code, Some(0));
    }

    #[test]
    fn output_beyond_limit_is_counted_not_kept() {
        let out = run_supervised(sh("printf 'abcdefghij'"), &limits(5_000), 4, |_| {})
            .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn missing_executable_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-binary-waypoints");
        assert!(run_supervised(cmd, &limits(1_000), 1024, |_| {}).is_err());
    }
}
