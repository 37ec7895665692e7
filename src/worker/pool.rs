//! The set of worker processes and their supervision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::proc::Proc;
use super::signals::{TerminationReason, WorkerFailure};
use crate::error::{LanternError, Result};

/// What to do when a worker exits while the server is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Log the failure and carry on with the remaining workers.
    #[default]
    Report,
    /// Spawn a replacement, at most `max_restarts` times per worker slot.
    Restart { max_restarts: usize },
}

/// Produces the process for worker slot `id`.
pub type Spawner = Box<dyn Fn(usize) -> Result<Proc> + Send + Sync>;

struct Worker {
    id: usize,
    /// `None` once the worker died and was not replaced.
    proc: Option<Proc>,
    restarts: usize,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    spawner: Spawner,
    policy: RestartPolicy,
}

impl WorkerPool {
    /// Spawn `count` workers. If any fails to start, the ones already
    /// running are killed and the error is returned.
    pub fn spawn(count: usize, spawner: Spawner, policy: RestartPolicy) -> Result<Self> {
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let proc = spawner(id)?;
            workers.push(Worker {
                id,
                proc: Some(proc),
                restarts: 0,
            });
        }
        info!(workers = count, policy = ?policy, "Worker pool started");
        Ok(Self {
            workers,
            spawner,
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Number of worker slots with a live (not yet reaped) process.
    pub fn alive(&mut self) -> usize {
        let mut alive = 0;
        for proc in self.workers.iter_mut().filter_map(|w| w.proc.as_mut()) {
            if proc.is_running() {
                alive += 1;
            }
        }
        alive
    }

    /// Check every worker once and apply the restart policy to the dead ones.
    pub fn supervise(&mut self) -> Vec<WorkerFailure> {
        let mut failures = Vec::new();
        for worker in &mut self.workers {
            let Some(proc) = worker.proc.as_mut() else {
                continue;
            };
            let reason = match proc.try_wait() {
                Ok(None) => continue,
                Ok(Some(reason)) => reason,
                Err(e) => {
                    warn!(worker_id = worker.id, error = %e, "Lost track of worker");
                    TerminationReason::Unknown
                }
            };

            let mut failure = WorkerFailure::new(worker.id, proc.pid().as_raw(), reason);
            worker.proc = None;

            warn!(
                worker_id = worker.id,
                pid = failure.pid,
                reason = %failure.reason,
                recoverable = failure.is_recoverable(),
                "Worker exited unexpectedly"
            );

            if let RestartPolicy::Restart { max_restarts } = self.policy {
                if worker.restarts >= max_restarts {
                    warn!(
                        worker_id = worker.id,
                        restarts = worker.restarts,
                        "Restart limit reached, leaving worker slot empty"
                    );
                } else {
                    match (self.spawner)(worker.id) {
                        Ok(proc) => {
                            worker.restarts += 1;
                            failure.restarted = true;
                            info!(
                                worker_id = worker.id,
                                pid = proc.pid().as_raw(),
                                restart_count = worker.restarts,
                                "Worker restarted"
                            );
                            worker.proc = Some(proc);
                        }
                        Err(e) => {
                            warn!(worker_id = worker.id, error = %e, "Failed to restart worker");
                        }
                    }
                }
            }
            failures.push(failure);
        }
        failures
    }

    /// Wait for every worker to exit, sharing one deadline across the pool.
    /// Stragglers are terminated once it passes.
    pub fn wait_all(&mut self, timeout: Duration) -> Vec<(usize, TerminationReason)> {
        let deadline = Instant::now() + timeout;
        let mut exits = Vec::with_capacity(self.workers.len());
        for worker in &mut self.workers {
            let Some(mut proc) = worker.proc.take() else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match proc.stop(remaining) {
                Ok(reason) => {
                    debug!(worker_id = worker.id, reason = %reason, "Worker exited");
                    exits.push((worker.id, reason));
                }
                Err(e) => {
                    warn!(worker_id = worker.id, error = %e, "Failed to reap worker");
                    exits.push((worker.id, TerminationReason::Unknown));
                }
            }
        }
        exits
    }
}

/// How often the supervisor polls worker liveness.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

/// Background thread applying [`WorkerPool::supervise`] while the server runs.
pub struct Supervisor {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn start(pool: Arc<Mutex<WorkerPool>>) -> Result<Self> {
        Self::with_interval(pool, SUPERVISE_INTERVAL)
    }

    pub fn with_interval(pool: Arc<Mutex<WorkerPool>>, interval: Duration) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("worker-supervisor".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    pool.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .supervise();
                    thread::sleep(interval);
                }
            })
            .map_err(|e| LanternError::Worker(format!("Failed to start supervisor: {}", e)))?;
        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop supervising. Exits observed after this are expected.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::sync::atomic::AtomicUsize;

    fn shell(script: &'static str) -> Spawner {
        Box::new(move |_| {
            let child = Command::new("sh")
                .args(["-c", script])
                .stdout(Stdio::null())
                .spawn()
                .map_err(LanternError::from)?;
            Ok(Proc::from_child(child))
        })
    }

    fn settle(pool: &mut WorkerPool) -> Vec<WorkerFailure> {
        for _ in 0..200 {
            let failures = pool.supervise();
            if !failures.is_empty() {
                return failures;
            }
            thread::sleep(Duration::from_millis(10));
        }
        Vec::new()
    }

    #[test]
    fn test_report_policy_does_not_restart() {
        let mut pool = WorkerPool::spawn(1, shell("exit 7"), RestartPolicy::Report).unwrap();
        let failures = settle(&mut pool);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, TerminationReason::Exited(7));
        assert!(!failures[0].restarted);
        assert_eq!(pool.alive(), 0);
        assert!(pool.supervise().is_empty());
    }

    #[test]
    fn test_restart_policy_respects_limit() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&spawned);
        let spawner: Spawner = Box::new(move |id| {
            counter.fetch_add(1, Ordering::SeqCst);
            shell("exit 9")(id)
        });
        let mut pool =
            WorkerPool::spawn(1, spawner, RestartPolicy::Restart { max_restarts: 2 }).unwrap();

        let mut restarted = 0;
        let mut reported = 0;
        for _ in 0..3 {
            for failure in settle(&mut pool) {
                reported += 1;
                if failure.restarted {
                    restarted += 1;
                }
            }
        }
        assert_eq!(reported, 3);
        assert_eq!(restarted, 2);
        assert_eq!(spawned.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_all_escalates_after_deadline() {
        let mut pool = WorkerPool::spawn(2, shell("exec sleep 60"), RestartPolicy::Report).unwrap();
        assert_eq!(pool.len(), 2);
        let started = Instant::now();
        let exits = pool.wait_all(Duration::from_millis(50));
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|(_, r)| !r.is_success()));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.alive(), 0);
    }

    #[test]
    fn test_supervisor_thread_reports_and_stops() {
        let pool = Arc::new(Mutex::new(
            WorkerPool::spawn(1, shell("exit 0"), RestartPolicy::Report).unwrap(),
        ));
        let mut supervisor =
            Supervisor::with_interval(Arc::clone(&pool), Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(200));
        supervisor.stop();
        assert_eq!(pool.lock().unwrap().alive(), 0);
    }
}
