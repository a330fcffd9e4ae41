//! One running extractor subprocess.
//!
//! [`ExtractionProcess`] owns the child, hands out its stdout exactly once and
//! keeps a bounded tail of its stderr. Every handle is either reaped through
//! [`ExtractionProcess::wait`] / [`ExtractionProcess::terminate`] or, if
//! dropped early, killed by tokio (`kill_on_drop`) and reaped in the background.

use std::fmt;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::core::config;
use crate::download::diagnostics::DiagnosticCapture;

/// Termination status of an extractor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStatus {
    Pending,
    /// Exited on its own with a code
    Exited(i32),
    /// Terminated by a signal we did not send
    Signaled,
    /// Killed by us
    Killed,
}

impl TerminationStatus {
    pub fn is_success(self) -> bool {
        self == TerminationStatus::Exited(0)
    }

    pub fn is_terminal(self) -> bool {
        self != TerminationStatus::Pending
    }

    fn from_exit(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => TerminationStatus::Exited(code),
            None => TerminationStatus::Signaled,
        }
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationStatus::Pending => write!(f, "pending"),
            TerminationStatus::Exited(code) => write!(f, "exit code {}", code),
            TerminationStatus::Signaled => write!(f, "terminated by signal"),
            TerminationStatus::Killed => write!(f, "killed"),
        }
    }
}

/// A spawned extractor, exclusively owned by one request.
pub struct ExtractionProcess {
    child: Child,
    output: Option<ChildStdout>,
    diagnostics: DiagnosticCapture,
    diagnostics_task: Option<JoinHandle<()>>,
    status: TerminationStatus,
    label: String,
}

impl ExtractionProcess {
    /// Spawns `cmd` with piped stdout/stderr and a null stdin.
    ///
    /// `label` tags every log line of this process (usually the request id).
    pub fn spawn(mut cmd: Command, label: impl Into<String>, tail_bytes: usize) -> std::io::Result<Self> {
        let label = label.into();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let output = child.stdout.take();
        let diagnostics = DiagnosticCapture::new(tail_bytes);
        let diagnostics_task = child
            .stderr
            .take()
            .map(|stderr| diagnostics.spawn_reader(stderr, label.clone()));

        log::debug!("[{}] extractor started (pid {:?})", label, child.id());

        Ok(Self {
            child,
            output,
            diagnostics,
            diagnostics_task,
            status: TerminationStatus::Pending,
            label,
        })
    }

    /// Takes the output stream. Returns `None` on every call after the first,
    /// or if the process was started without a stdout pipe.
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    pub fn status(&self) -> TerminationStatus {
        self.status
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the process to exit on its own and reaps it.
    pub async fn wait(&mut self) -> std::io::Result<TerminationStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        let status = self.child.wait().await?;
        self.status = TerminationStatus::from_exit(status);
        self.flush_diagnostics().await;
        log::debug!("[{}] extractor finished: {}", self.label, self.status);
        Ok(self.status)
    }

    /// Kills the process if it is still running and reaps it. Safe to call
    /// repeatedly; a process that already exited keeps its exit status.
    pub async fn terminate(&mut self) -> TerminationStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        // It may have exited on its own in the meantime
        if let Ok(Some(status)) = self.child.try_wait() {
            self.status = TerminationStatus::from_exit(status);
            return self.status;
        }

        if let Err(e) = self.child.start_kill() {
            log::warn!("[{}] failed to signal extractor: {}", self.label, e);
        }
        match self.child.wait().await {
            Ok(_) => self.status = TerminationStatus::Killed,
            Err(e) => {
                // Nothing left to reap; tokio's orphan reaper owns it now
                log::warn!("[{}] failed to reap extractor: {}", self.label, e);
                self.status = TerminationStatus::Killed;
            }
        }
        log::debug!("[{}] extractor killed", self.label);
        self.status
    }

    /// Most recent stderr output of the process.
    pub fn diagnostic_tail(&self) -> String {
        self.diagnostics.snapshot()
    }

    /// Gives the stderr reader a short grace period to pick up the final lines.
    async fn flush_diagnostics(&mut self) {
        if let Some(task) = self.diagnostics_task.take() {
            // A grandchild (ffmpeg) may keep stderr open after we are done
            if tokio::time::timeout(config::extractor::diagnostic_flush(), task)
                .await
                .is_err()
            {
                log::debug!("[{}] stderr still open after exit", self.label);
            }
        }
    }
}

impl Drop for ExtractionProcess {
    fn drop(&mut self) {
        if !self.status.is_terminal() {
            log::debug!(
                "[{}] dropping running extractor (pid {:?}), killing",
                self.label,
                self.child.id()
            );
        }
        if let Some(task) = self.diagnostics_task.take() {
            task.abort();
        }
    }
}

/// Run an async Command to completion with a timeout.
///
/// Used for short helper invocations such as `--version`; the child is killed
/// if the deadline passes.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Output> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("process timed out after {}s", timeout.as_secs()),
        )),
    }
}
