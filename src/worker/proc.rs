//! Handle to one worker process.

use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{LanternError, Result};

/// Grace period after SIGTERM before escalating to SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(200);

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A spawned worker, reaped exactly once.
pub struct Proc {
    pid: Pid,
    exit: Option<TerminationReason>,
}

impl Proc {
    pub fn from_child(child: Child) -> Self {
        // `Child` neither waits nor kills on drop; reaping is ours from here on.
        Self {
            pid: Pid::from_raw(child.id() as i32),
            exit: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// How the process ended, once it has been reaped.
    #[cfg(test)]
    pub fn exit_reason(&self) -> Option<&TerminationReason> {
        self.exit.as_ref()
    }

    fn record(&mut self, status: WaitStatus) -> TerminationReason {
        let reason = analyze_wait_status(status);
        self.exit = Some(reason.clone());
        reason
    }

    /// Reap the process if it has exited. Never blocks.
    pub fn try_wait(&mut self) -> Result<Option<TerminationReason>> {
        if let Some(reason) = &self.exit {
            return Ok(Some(reason.clone()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => Ok(Some(self.record(status))),
            Err(e) => Err(LanternError::Worker(format!(
                "waitpid({}) failed: {}",
                self.pid, e
            ))),
        }
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Block until the process exits.
    pub fn wait(&mut self) -> Result<TerminationReason> {
        if let Some(reason) = &self.exit {
            return Ok(reason.clone());
        }
        waitpid(self.pid, None)
            .map(|status| self.record(status))
            .map_err(|e| LanternError::Worker(format!("waitpid({}) failed: {}", self.pid, e)))
    }

    /// Poll for exit until `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<TerminationReason>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(reason) = self.try_wait()? {
                return Ok(Some(reason));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// SIGKILL, then reap.
    pub fn kill(&mut self) -> Result<TerminationReason> {
        self.signal(Signal::SIGKILL)?;
        self.wait()
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, sig)
            .map_err(|e| LanternError::Worker(format!("Failed to send {:?}: {}", sig, e)))
    }

    /// Wait up to `timeout` for a voluntary exit, then SIGTERM, then SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> Result<TerminationReason> {
        if let Some(reason) = self.wait_timeout(timeout)? {
            return Ok(reason);
        }
        tracing::debug!(pid = %self.pid, "Worker did not exit in time, sending SIGTERM");
        self.terminate()?;
        if let Some(reason) = self.wait_timeout(TERM_GRACE)? {
            return Ok(reason);
        }
        tracing::warn!(pid = %self.pid, "Worker ignored SIGTERM, killing");
        self.kill()
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}
