//! Persistent line-oriented engine sessions.
//!
//! The differential comparator keeps a subject and a reference engine alive for
//! a whole session and talks to each over stdin/stdout, one line at a time.
//! [`LineChannel`] is the transport; [`EngineAdapter`] hides each engine's
//! dialect behind the same `send_command`/`read_metric` pair.
use crate::cancel::CancelToken;
use crate::child::{forward_lines, ChildGuard, POLL_INTERVAL};
use crate::command::CommandLine;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};

/// A bidirectional, line-framed conversation with an engine.
pub trait LineChannel {
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Next line without its terminator, or `None` once the engine closed stdout.
    fn read_line(&mut self) -> Result<Option<String>>;
}

/// A long-lived engine child process.
///
/// stdout is drained by a reader thread so reads can wake up for cancellation.
/// Dropping the process closes stdin and then terminates and reaps the child.
pub struct EngineProcess {
    label: String,
    stdin: Option<ChildStdin>,
    lines: Receiver<io::Result<String>>,
    cancel: CancelToken,
    guard: ChildGuard,
}

impl EngineProcess {
    pub fn spawn(label: &str, command: &CommandLine, cancel: &CancelToken) -> Result<Self> {
        cancel.check()?;
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {label} engine: {command}"))?;
        let mut guard = ChildGuard::new(child);
        let stdin = guard
            .child_mut()
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{label} engine has no stdin pipe"))?;
        let stdout = guard
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{label} engine has no stdout pipe"))?;
        if let Some(stderr) = guard.child_mut().stderr.take() {
            forward_lines(format!("{label}-stderr"), stderr)
                .with_context(|| format!("start {label} stderr reader"))?;
        }

        let (sender, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if sender.send(line).is_err() || failed {
                        break;
                    }
                }
            })
            .with_context(|| format!("start {label} reader thread"))?;

        tracing::info!(engine = label, pid = guard.id(), command = %command, "engine started");
        Ok(Self {
            label: label.to_string(),
            stdin: Some(stdin),
            lines,
            cancel: cancel.clone(),
            guard,
        })
    }
}

impl LineChannel for EngineProcess {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.cancel.check()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("{} engine stdin already closed", self.label))?;
        tracing::debug!(engine = %self.label, "> {line}");
        writeln!(stdin, "{line}")
            .and_then(|()| stdin.flush())
            .with_context(|| format!("write to {} engine", self.label))
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            self.cancel.check()?;
            match self.lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    let line = line.with_context(|| format!("read from {} engine", self.label))?;
                    let line = line.trim_end_matches('\r').to_string();
                    tracing::debug!(engine = %self.label, "< {line}");
                    return Ok(Some(line));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.stdin.take();
        self.guard.terminate();
        tracing::debug!(engine = %self.label, "engine stopped");
    }
}

/// One engine dialect for the perft-style node count query.
pub trait EngineAdapter {
    fn label(&self) -> &str;

    fn send_command(&mut self, text: &str) -> Result<()>;

    /// Read the reply to the last metric command as a node count.
    fn read_metric(&mut self) -> Result<u64>;

    fn metric_command(&self, depth: u32) -> String;

    /// Set up `position` and count legal move paths `depth` plies deep.
    fn node_count(&mut self, position: &str, depth: u32) -> Result<u64> {
        self.send_command(&format!("setboard {position}"))?;
        let command = self.metric_command(depth);
        self.send_command(&command)?;
        self.read_metric()
            .with_context(|| format!("{} node count for {position}", self.label()))
    }
}

/// An engine able to invent stimuli.
pub trait PositionGenerator {
    /// One random position; may be empty when the engine has nothing to offer.
    fn random_position(&mut self) -> Result<String>;
}

fn closed(label: &str) -> anyhow::Error {
    anyhow!("{label} engine closed its output")
}

/// ccore in `findbuggypos` mode: `perftdiv N` answers with a bare integer.
pub struct SubjectEngine<C> {
    channel: C,
}

impl<C: LineChannel> SubjectEngine<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: LineChannel> EngineAdapter for SubjectEngine<C> {
    fn label(&self) -> &str {
        "subject"
    }

    fn send_command(&mut self, text: &str) -> Result<()> {
        self.channel.write_line(text)
    }

    fn read_metric(&mut self) -> Result<u64> {
        let line = self.channel.read_line()?.ok_or_else(|| closed("subject"))?;
        let line = line.trim();
        line.parse::<u64>()
            .with_context(|| format!("subject answered {line:?}, expected a node count"))
    }

    fn metric_command(&self, depth: u32) -> String {
        format!("perftdiv {depth}")
    }
}

impl<C: LineChannel> PositionGenerator for SubjectEngine<C> {
    fn random_position(&mut self) -> Result<String> {
        self.channel.write_line("randompos")?;
        let line = self.channel.read_line()?.ok_or_else(|| closed("subject"))?;
        Ok(line.trim().to_string())
    }
}

/// A third-party engine whose `divide N` prints per-move lines and then
/// `"<N> nodes in ..."`.
pub struct ReferenceEngine<C> {
    channel: C,
    total: Regex,
}

impl<C: LineChannel> ReferenceEngine<C> {
    pub fn new(channel: C) -> Result<Self> {
        let total = Regex::new(r"^(\d+) nodes in").context("compile node total pattern")?;
        Ok(Self { channel, total })
    }
}

impl<C: LineChannel> EngineAdapter for ReferenceEngine<C> {
    fn label(&self) -> &str {
        "reference"
    }

    fn send_command(&mut self, text: &str) -> Result<()> {
        self.channel.write_line(text)
    }

    fn read_metric(&mut self) -> Result<u64> {
        loop {
            let line = self
                .channel
                .read_line()?
                .ok_or_else(|| closed("reference"))?;
            if let Some(captures) = self.total.captures(&line) {
                return captures[1]
                    .parse::<u64>()
                    .with_context(|| format!("parse reference total {line:?}"));
            }
        }
    }

    fn metric_command(&self, depth: u32) -> String {
        format!("divide {depth}")
    }
}
