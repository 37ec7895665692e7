//! Classifying how a worker process ended.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Exited(i32),
    Signaled(Signal),
    /// SIGKILL. Either our own escalation or the OOM killer.
    Killed,
    /// SIGSEGV on Linux, SIGBUS on macOS.
    StackOverflow(Signal),
    Unknown,
}

impl TerminationReason {
    /// Whether a fresh process could reasonably succeed where this one failed.
    ///
    /// A worker exiting with status 1 lost its bridge connection; restarting it
    /// would only fail the same way.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Exited(code) => *code != 0 && *code != 1,
            Self::Killed | Self::StackOverflow(_) | Self::Signaled(_) => true,
            Self::Unknown => false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::Killed => write!(f, "killed (SIGKILL, possibly out of memory)"),
            Self::StackOverflow(sig) => write!(f, "stack overflow ({:?})", sig),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}

pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, Signal::SIGKILL, _) => TerminationReason::Killed,
        WaitStatus::Signaled(_, sig @ (Signal::SIGSEGV | Signal::SIGBUS), _) => {
            TerminationReason::StackOverflow(sig)
        }
        WaitStatus::Signaled(_, sig, _) => TerminationReason::Signaled(sig),
        _ => TerminationReason::Unknown,
    }
}

/// An unexpected worker exit observed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub worker_id: usize,
    pub pid: i32,
    pub reason: TerminationReason,
    /// Set when a replacement was spawned.
    pub restarted: bool,
}

impl WorkerFailure {
    pub fn new(worker_id: usize, pid: i32, reason: TerminationReason) -> Self {
        Self {
            worker_id,
            pid,
            reason,
            restarted: false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.reason.is_recoverable()
    }
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Worker {} (pid {}) {}", self.worker_id, self.pid, self.reason)?;
        if self.restarted {
            write!(f, ", restarted")?;
        }
        Ok(())
    }
}
