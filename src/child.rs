//! Scoped ownership of spawned children.
//!
//! Every child the harness spawns lives inside a `ChildGuard`, so whichever way
//! the owning scope exits (normal return, `?`, cancellation, panic) the child is
//! terminated and reaped rather than left running behind the harness.
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often blocking waits wake up to check for cancellation.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(250);

pub(crate) struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    pub(crate) fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.child.id()
    }

    pub(crate) fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Ask the child to stop, escalate to a kill, and reap it.
    pub(crate) fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        request_termination(&self.child);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    self.reaped = true;
                    return;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Drain a child's output stream on its own thread, logging each line at
/// debug level under `source` (e.g. `ccore` or `reference-stderr`).
pub(crate) fn forward_lines<R>(source: String, reader: R) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{source}-output"))
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        tracing::debug!(source = %source, "{}", line.trim_end());
                    }
                    Err(err) => {
                        tracing::debug!(source = %source, error = %err, "output stream failed");
                        break;
                    }
                }
            }
        })
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}
