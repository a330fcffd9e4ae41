//! Lifecycle of one streamed download.
//!
//! A relay starts in [`LifecycleState::Running`] and ends in exactly one of
//! `Completed`, `ClientAborted` or `ProcessFailed`. Whatever the path, the
//! extractor is reaped (killed first unless it completed on its own) and the
//! response sink is closed once.

use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::metrics;
use crate::download::diagnostics::{classify_failure, FailureKind};
use crate::download::launcher::ExtractionMode;
use crate::download::process::{ExtractionProcess, TerminationStatus};
use crate::download::relay::{pump, CloseKind, PumpEnd, RelayLimits, RelayStats, ResponseSink};

/// Relay state machine. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    Running,
    Completed,
    ClientAborted,
    ProcessFailed,
}

/// Something that ends a relay.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// Output drained and the extractor exited with code 0
    Drained,
    /// The client went away (body receiver dropped)
    ClientDisconnected,
    /// The client is still connected but did not accept a chunk within the idle window
    ClientStalled,
    /// The request was cancelled from outside (server shutdown)
    Cancelled,
    ProcessFailed(FailureReason),
}

/// Why a relay ended in `ProcessFailed`.
#[derive(Debug)]
pub enum FailureReason {
    /// The extractor was started without a stdout pipe
    NoOutput,
    /// Non-zero exit or death by an outside signal
    Exit(TerminationStatus),
    /// Reading stdout failed
    BrokenOutput(String),
    /// No output for longer than the idle window
    Stalled,
    /// Output closed but the process did not exit within the idle window
    ExitStalled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoOutput => write!(f, "extractor produced no output pipe"),
            FailureReason::Exit(status) => write!(f, "extractor failed with {}", status),
            FailureReason::BrokenOutput(e) => write!(f, "extractor output broken: {}", e),
            FailureReason::Stalled => write!(f, "extractor output stalled"),
            FailureReason::ExitStalled => write!(f, "extractor did not exit after closing its output"),
        }
    }
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self != LifecycleState::Running
    }

    /// Applies an event. Terminal states absorb every later event, so the
    /// first terminal transition wins.
    pub fn on(self, event: &LifecycleEvent) -> Self {
        if self.is_terminal() {
            return self;
        }
        match event {
            LifecycleEvent::Drained => LifecycleState::Completed,
            LifecycleEvent::ClientDisconnected | LifecycleEvent::ClientStalled | LifecycleEvent::Cancelled => {
                LifecycleState::ClientAborted
            }
            LifecycleEvent::ProcessFailed(_) => LifecycleState::ProcessFailed,
        }
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Final account of one relay.
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub mode: ExtractionMode,
    pub state: LifecycleState,
    pub stats: RelayStats,
    pub exit: TerminationStatus,
    /// Failure description, for `ProcessFailed` only
    pub failure: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

/// Binds one extractor to one response body.
struct RelaySession {
    mode: ExtractionMode,
    label: String,
    state: LifecycleState,
    stats: RelayStats,
}

impl RelaySession {
    fn new(mode: ExtractionMode, label: String) -> Self {
        Self {
            mode,
            label,
            state: LifecycleState::Running,
            stats: RelayStats::default(),
        }
    }

    /// Performs the single terminal transition: reap, close, report.
    async fn finish(
        mut self,
        process: &mut ExtractionProcess,
        sink: &mut ResponseSink,
        event: LifecycleEvent,
    ) -> RelayReport {
        self.state = self.state.on(&event);
        let mut failure = None;
        let mut failure_kind = None;

        let exit = match self.state {
            LifecycleState::Completed => {
                sink.close(CloseKind::Finished).await;
                log::info!(
                    "[{}] {} relay completed: {} bytes in {} chunks",
                    self.label,
                    self.mode,
                    self.stats.bytes_transferred,
                    self.stats.chunks
                );
                process.status()
            }
            LifecycleState::ClientAborted => {
                let exit = process.terminate().await;
                // A client that is still connected must not see a clean end of a truncated body
                let cause = match event {
                    LifecycleEvent::Cancelled => "request cancelled",
                    LifecycleEvent::ClientStalled => "client stopped reading",
                    _ => "client disconnected",
                };
                let close = match event {
                    LifecycleEvent::ClientDisconnected => CloseKind::Finished,
                    _ => CloseKind::Aborted(cause.to_string()),
                };
                sink.close(close).await;
                log::warn!(
                    "[{}] {} relay aborted ({}) after {} bytes; extractor {}",
                    self.label,
                    self.mode,
                    cause,
                    self.stats.bytes_transferred,
                    exit
                );
                exit
            }
            LifecycleState::ProcessFailed | LifecycleState::Running => {
                let exit = process.terminate().await;
                let reason = match &event {
                    LifecycleEvent::ProcessFailed(reason) => reason.to_string(),
                    other => format!("{:?}", other),
                };
                sink.close(CloseKind::Aborted(reason.clone())).await;

                let tail = process.diagnostic_tail();
                let kind = classify_failure(&tail);
                metrics::record_extractor_failure(self.mode.label(), kind.label());
                log::error!(
                    "[{}] {} relay failed after {} bytes: {} ({})",
                    self.label,
                    self.mode,
                    self.stats.bytes_transferred,
                    reason,
                    kind.label()
                );
                if !tail.trim().is_empty() {
                    log::error!("[{}] extractor stderr tail:\n{}", self.label, tail.trim_end());
                }
                failure = Some(reason);
                failure_kind = Some(kind);
                exit
            }
        };

        metrics::record_relay_outcome(self.mode.label(), self.state.label(), self.stats.bytes_transferred);

        RelayReport {
            mode: self.mode,
            state: self.state,
            stats: self.stats,
            exit,
            failure,
            failure_kind,
        }
    }
}

/// Relays `process` output into `sink` until a terminal state is reached.
///
/// `token` is scoped to this request; cancelling it aborts the relay and kills
/// the extractor.
pub async fn run_relay(
    mut process: ExtractionProcess,
    mut sink: ResponseSink,
    token: CancellationToken,
    mode: ExtractionMode,
    limits: RelayLimits,
) -> RelayReport {
    let session = RelaySession::new(mode, process.label().to_string());
    let _active = metrics::ActiveRelayGuard::new(mode.label());

    let Some(output) = process.take_output() else {
        return session
            .finish(
                &mut process,
                &mut sink,
                LifecycleEvent::ProcessFailed(FailureReason::NoOutput),
            )
            .await;
    };

    let mut session = session;
    let end = pump(output, &mut sink, &token, limits, &mut session.stats).await;

    let event = match end {
        PumpEnd::Drained => {
            // Output is closed; the exit code decides between success and failure
            match tokio::time::timeout(limits.idle_timeout, process.wait()).await {
                Ok(Ok(status)) if status.is_success() => LifecycleEvent::Drained,
                Ok(Ok(status)) => LifecycleEvent::ProcessFailed(FailureReason::Exit(status)),
                Ok(Err(e)) => LifecycleEvent::ProcessFailed(FailureReason::BrokenOutput(e.to_string())),
                Err(_) => LifecycleEvent::ProcessFailed(FailureReason::ExitStalled),
            }
        }
        PumpEnd::ClientGone => LifecycleEvent::ClientDisconnected,
        PumpEnd::WriteStalled => LifecycleEvent::ClientStalled,
        PumpEnd::Cancelled => LifecycleEvent::Cancelled,
        PumpEnd::ReadFailed(e) => LifecycleEvent::ProcessFailed(FailureReason::BrokenOutput(e.to_string())),
        PumpEnd::ReadStalled => LifecycleEvent::ProcessFailed(FailureReason::Stalled),
    };

    session.finish(&mut process, &mut sink, event).await
}

/// Runs [`run_relay`] on its own task so a slow extractor never holds up the
/// connection task that serves the body.
pub fn spawn_relay(
    process: ExtractionProcess,
    sink: ResponseSink,
    token: CancellationToken,
    mode: ExtractionMode,
    limits: RelayLimits,
) -> JoinHandle<RelayReport> {
    tokio::spawn(run_relay(process, sink, token, mode, limits))
}
