//! Interrupt handling.
//!
//! A single `CancelToken` is installed at startup and observed by every
//! blocking wait in the harness. SIGINT, SIGTERM and SIGHUP only flip the
//! token; the waits notice it, reap their children and report a cancelled
//! result instead of the process dying mid-stage.
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error marker for operations aborted by the user.
#[derive(Debug, thiserror::Error)]
#[error("cancelled by user")]
pub struct Cancelled;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token and route termination signals into it.
    ///
    /// Can only be called once per process; the signal handler is global.
    pub fn install() -> Result<Self> {
        let token = Self::manual();
        let flag = Arc::clone(&token.flag);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("install interrupt handler")?;
        Ok(token)
    }

    /// Create a token that only fires when `cancel` is called.
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with [`Cancelled`] once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }
}
