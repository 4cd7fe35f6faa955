//! Blocking, cancellable invocation of short-lived processes.
use crate::cancel::CancelToken;
use crate::child::{forward_lines, ChildGuard, POLL_INTERVAL};
use crate::command::CommandLine;
use crate::failure::StageFailure;
use crate::launch::LaunchStrategy;
use serde::Serialize;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Exited { code: i32 },
    Signalled { signal: Option<i32> },
    LaunchFailed { reason: String },
    Cancelled,
}

/// What happened when a command line was run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// The command as actually spawned, wrapper included.
    pub command: String,
    pub outcome: InvocationOutcome,
    pub duration_ms: u128,
}

impl Invocation {
    /// Zero exit is the only success; other codes are not interpreted.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Exited { code: 0 })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            InvocationOutcome::Exited { code } => Some(code),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<StageFailure> {
        match &self.outcome {
            InvocationOutcome::Exited { code: 0 } => None,
            InvocationOutcome::Exited { code } => Some(StageFailure::NonzeroExit { code: *code }),
            InvocationOutcome::Signalled { signal } => {
                Some(StageFailure::Signalled { signal: *signal })
            }
            InvocationOutcome::LaunchFailed { reason } => Some(StageFailure::LaunchFailure {
                reason: reason.clone(),
            }),
            InvocationOutcome::Cancelled => Some(StageFailure::Cancelled),
        }
    }
}

/// Seam between pipelines and the operating system.
pub trait Invoke {
    /// Run `command` and block until it exits or is cancelled.
    fn invoke(&self, command: &CommandLine) -> Invocation;
}

pub struct ProcessInvoker<'a> {
    strategy: &'a LaunchStrategy,
    cancel: &'a CancelToken,
}

impl<'a> ProcessInvoker<'a> {
    pub fn new(strategy: &'a LaunchStrategy, cancel: &'a CancelToken) -> Self {
        Self { strategy, cancel }
    }
}

impl Invoke for ProcessInvoker<'_> {
    fn invoke(&self, command: &CommandLine) -> Invocation {
        let command = self.strategy.apply(command);
        let shown = command.to_string();
        let start = Instant::now();
        let outcome = run_to_completion(&command, self.cancel);
        let duration_ms = start.elapsed().as_millis();

        match &outcome {
            InvocationOutcome::Exited { code } => {
                tracing::info!(elapsed_ms = duration_ms, code, command = %shown, "ccore invoke complete");
            }
            other => {
                tracing::warn!(elapsed_ms = duration_ms, outcome = ?other, command = %shown, "ccore invoke failed");
            }
        }

        Invocation {
            command: shown,
            outcome,
            duration_ms,
        }
    }
}

fn run_to_completion(command: &CommandLine, cancel: &CancelToken) -> InvocationOutcome {
    if cancel.is_cancelled() {
        return InvocationOutcome::Cancelled;
    }
    tracing::debug!(command = %command, "calling");
    // stdout belongs to the harness's own report, so ccore's chatter goes to the log.
    let spawned = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            return InvocationOutcome::LaunchFailed {
                reason: format!("spawn {}: {err}", command.program.display()),
            }
        }
    };
    let forwarder = child
        .stdout
        .take()
        .map(|stdout| forward_lines("ccore".to_string(), stdout));

    let mut guard = ChildGuard::new(child);
    let forwarder = match forwarder {
        Some(Ok(handle)) => Some(handle),
        Some(Err(err)) => {
            return InvocationOutcome::LaunchFailed {
                reason: format!("start output reader for pid {}: {err}", guard.id()),
            }
        }
        None => None,
    };
    loop {
        match guard.try_wait() {
            Ok(Some(status)) => {
                if let Some(handle) = forwarder {
                    let _ = handle.join();
                }
                return exit_outcome(status);
            }
            Ok(None) => {}
            Err(err) => {
                return InvocationOutcome::LaunchFailed {
                    reason: format!("wait for pid {}: {err}", guard.id()),
                }
            }
        }
        if cancel.is_cancelled() {
            guard.terminate();
            return InvocationOutcome::Cancelled;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn exit_outcome(status: ExitStatus) -> InvocationOutcome {
    if let Some(code) = status.code() {
        return InvocationOutcome::Exited { code };
    }
    InvocationOutcome::Signalled {
        signal: exit_signal(&status),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
