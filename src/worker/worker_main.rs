//! Worker process entry point and the claim/execute/respond loop.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::bridge::RemoteQueue;
use crate::error::{LanternError, Result};
use crate::executor::{Executor, FeatureExecutor};
use crate::extensions::{self, BootOptions};
use crate::queue::{JobResult, JobSource};

/// Parsed `--internal-worker` invocation.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub worker_id: usize,
    pub bridge: PathBuf,
    pub poll_interval: Duration,
    pub boot: BootOptions,
}

/// Claim jobs from `queue` until it closes.
///
/// The job handle is released before execution starts, so a cancel that
/// arrives afterwards is a no-op and the job runs to completion. Returns
/// `Ok(())` once the queue reports it is closed; any other failure, such as
/// losing the bridge, is returned to the caller.
pub fn worker_loop<Q: JobSource>(
    queue: &Q,
    executor: &dyn Executor,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        let job = match queue.pop_request() {
            Ok(Some(job)) => job,
            Ok(None) => {
                thread::sleep(poll_interval);
                continue;
            }
            Err(LanternError::QueueClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        if let Some(id) = &job.request.id {
            queue.remove_job_handle(id)?;
        }

        let result = if job.cancelled {
            trace!(method = %job.request.method, "Skipping cancelled job");
            JobResult::null()
        } else {
            executor.execute(&job.request, queue)
        };

        match queue.push_response(job.request, result) {
            Ok(()) => {}
            Err(LanternError::QueueClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Run a worker process. Never returns.
pub fn run_worker_main(args: WorkerArgs) -> ! {
    // Ignore SIGPIPE so a vanished coordinator shows up as an io::Error.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let _span = tracing::info_span!("worker", id = args.worker_id).entered();

    let boot = extensions::boot(&args.boot);
    for failure in &boot.errors {
        debug!(error = %failure, "Extension failed to load in worker");
    }
    let executor = FeatureExecutor::new(boot.registry, boot.errors);

    let queue = match RemoteQueue::connect(&args.bridge) {
        Ok(queue) => queue,
        Err(e) => {
            error!(error = %e, "Worker could not reach the coordinator");
            std::process::exit(1);
        }
    };
    info!(pid = std::process::id(), "Worker ready");

    match worker_loop(&queue, &executor, args.poll_interval) {
        Ok(()) => {
            debug!("Queue closed, worker exiting");
            std::process::exit(0)
        }
        Err(e) => {
            error!(error = %e, "Worker lost its queue");
            std::process::exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, RequestId};
    use crate::queue::{QueueOrder, QueueState};
    use crate::store::{DocumentStore, Documents};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    impl Executor for Echo {
        fn execute(&self, request: &Request, _documents: &dyn Documents) -> JobResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JobResult::value(json!({ "echo": request.method })).timed(0.0)
        }
    }

    fn drain(state: &QueueState) -> Vec<(Request, JobResult)> {
        let mut out = Vec::new();
        while let Some(pair) = state.pop_response().unwrap() {
            out.push(pair);
        }
        out
    }

    #[test]
    fn test_loop_executes_and_stops_on_close() {
        let state = Arc::new(QueueState::new(DocumentStore::new(1), QueueOrder::Fifo));
        let executor = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });

        state
            .push_request(Request::new(1, "textDocument/hover", Value::Null))
            .unwrap();
        state
            .push_request(Request::new(2, "textDocument/codeLens", Value::Null))
            .unwrap();
        state.cancel_job(&RequestId::Number(2));

        let handle = {
            let state = Arc::clone(&state);
            let executor = Arc::clone(&executor);
            thread::spawn(move || worker_loop(&*state, &*executor, Duration::from_millis(1)))
        };

        let mut responses = Vec::new();
        for _ in 0..500 {
            responses.extend(drain(&state));
            if responses.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        state.shutdown();
        assert!(handle.join().unwrap().is_ok());

        assert_eq!(responses.len(), 2);
        let (_, executed) = &responses[0];
        assert_eq!(executed.response, crate::queue::Response::Value(json!({"echo": "textDocument/hover"})));
        let (_, cancelled) = &responses[1];
        assert_eq!(*cancelled, JobResult::null());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loop_returns_immediately_on_closed_queue() {
        let state = QueueState::new(DocumentStore::new(1), QueueOrder::Fifo);
        state.shutdown();
        let executor = Echo {
            calls: AtomicUsize::new(0),
        };
        assert!(worker_loop(&state, &executor, Duration::from_millis(1)).is_ok());
    }
}
