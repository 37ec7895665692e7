//! The language server: dispatch, worker lifecycle and teardown.
//!
//! Lifecycle messages run inline on the dispatch thread in arrival order.
//! Everything else goes through the queue to the workers and comes back via
//! the Responder.
//!
//! ```text
//!   Idle ──initialize──▶ Initializing ──initialized──▶ Running
//!                                                        │ shutdown
//!   Exited ◀──────────────exit────────────── ShuttingDown ◀┘
//! ```

mod finalize;
mod responder;

use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace, warn};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::error::{LanternError, Result};
use crate::executor::{Executor, FeatureExecutor};
use crate::extensions;
use crate::protocol::transport::{FramedWriter, MessageReader, MessageWriter};
use crate::protocol::{Message, Request, RequestId, error_codes, methods};
use crate::queue::{JobResult, QueueState};
use crate::store::{DocumentStore, Documents};
use crate::worker::{self, Spawner, Supervisor, WorkerCommand, WorkerPool};

pub use finalize::Finalizer;
use responder::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Initializing,
    Running,
    ShuttingDown,
    Exited,
}

/// What the dispatch loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(i32),
}

enum Workers {
    Processes {
        bridge: Bridge,
        pool: Arc<Mutex<WorkerPool>>,
        supervisor: Supervisor,
    },
    /// `--workers 0`, or the fallback when processes cannot be started.
    Inline { thread: JoinHandle<()> },
}

pub struct Server {
    config: ServerConfig,
    state: Arc<QueueState>,
    writer: Arc<dyn MessageWriter>,
    executor: Arc<FeatureExecutor>,
    finalizer: Arc<Finalizer>,
    phase: Phase,
    responder: Option<Responder>,
    workers: Option<Workers>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        executor: FeatureExecutor,
        writer: Arc<dyn MessageWriter>,
    ) -> Self {
        let state = QueueState::new(DocumentStore::new(config.workers), config.queue_order);
        Self {
            config,
            state: Arc::new(state),
            writer,
            executor: Arc::new(executor),
            finalizer: Arc::new(Finalizer::new()),
            phase: Phase::Idle,
            responder: None,
            workers: None,
        }
    }

    /// Serve messages from `input` until `exit` or end of input.
    /// Returns the process exit status.
    pub fn run<R: BufRead>(mut self, input: R) -> i32 {
        let mut reader = MessageReader::new(input);
        loop {
            let request = match reader.read_message() {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!("Client closed the connection");
                    return self.exit();
                }
                Err(LanternError::Json(e)) => {
                    warn!(error = %e, "Skipping undecodable message");
                    continue;
                }
                Err(LanternError::Protocol(message)) => {
                    warn!(error = %message, "Skipping malformed frame");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Transport failed");
                    return self.exit();
                }
            };
            if let Flow::Exit(status) = self.dispatch(request) {
                return status;
            }
        }
    }

    pub fn dispatch(&mut self, request: Request) -> Flow {
        trace!(method = %request.method, id = ?request.id, phase = ?self.phase, "Dispatching");
        if request.method == methods::EXIT {
            return Flow::Exit(self.exit());
        }

        match self.phase {
            Phase::ShuttingDown | Phase::Exited => {
                self.reject(&request, error_codes::INVALID_REQUEST, "Server is shutting down");
                return Flow::Continue;
            }
            Phase::Idle if request.method != methods::INITIALIZE => {
                self.reject(
                    &request,
                    error_codes::SERVER_NOT_INITIALIZED,
                    "Server is not initialized",
                );
                return Flow::Continue;
            }
            _ => {}
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.initialize(request),
            methods::INITIALIZED => self.initialized(),
            methods::DID_OPEN | methods::DID_CHANGE | methods::DID_CLOSE => self.run_inline(request),
            methods::CANCEL_REQUEST => self.cancel(&request),
            methods::SHUTDOWN => self.shutdown(request),
            _ => self.enqueue(request),
        }
        Flow::Continue
    }

    /// Answer a request with an error without running it. Notifications are dropped.
    fn reject(&self, request: &Request, code: i64, message: &str) {
        let Some(id) = &request.id else {
            debug!(method = %request.method, reason = message, "Dropping notification");
            return;
        };
        let reply = Message::error(Some(id.clone()), code, message);
        self.state.synchronize(|| {
            if let Err(e) = self.writer.write(&reply) {
                warn!(error = %e, "Failed to write error reply");
            }
        });
    }

    fn run_inline(&self, request: Request) {
        let result = self.executor.execute(&request, self.state.as_ref());
        self.finalizer
            .finalize(&self.state, self.writer.as_ref(), &request, &result);
    }

    fn initialize(&mut self, request: Request) {
        if self.phase != Phase::Idle {
            self.reject(&request, error_codes::INVALID_REQUEST, "Server is already initialized");
            return;
        }
        self.run_inline(request);
        self.phase = Phase::Initializing;

        match Responder::start(
            Arc::clone(&self.state),
            Arc::clone(&self.writer),
            Arc::clone(&self.finalizer),
            self.config.poll_interval,
        ) {
            Ok(responder) => self.responder = Some(responder),
            Err(e) => error!(error = %e, "Asynchronous replies are unavailable"),
        }
    }

    fn initialized(&mut self) {
        if self.phase != Phase::Initializing {
            debug!("Ignoring repeated initialized notification");
            return;
        }
        let count = self
            .state
            .settings()
            .map(|settings| settings.worker_count)
            .unwrap_or(self.config.workers);

        let workers = if count == 0 {
            self.start_inline()
        } else {
            self.start_processes(count).or_else(|e| {
                warn!(error = %e, "Worker processes unavailable, serving requests inline");
                self.start_inline()
            })
        };
        match workers {
            Ok(workers) => self.workers = Some(workers),
            Err(e) => error!(error = %e, "No worker could be started"),
        }
        self.phase = Phase::Running;
    }

    fn start_processes(&self, count: usize) -> Result<Workers> {
        let bridge = Bridge::start(Arc::clone(&self.state))?;

        let mut command = WorkerCommand::current_exe(bridge.handle().to_path_buf())?;
        command.poll_interval = self.config.poll_interval;
        command.extension_paths = self.config.boot.search_paths.clone();
        command.verbose = self.config.verbose;
        command.log_format = self.config.log_format;
        command.log_file = self.config.log_file.clone();
        let spawner: Spawner = Box::new(move |id| worker::spawn_worker(&command, id));

        let pool = Arc::new(Mutex::new(WorkerPool::spawn(
            count,
            spawner,
            self.config.restart_policy,
        )?));
        let supervisor = Supervisor::start(Arc::clone(&pool))?;
        info!(workers = count, "Worker processes started");
        Ok(Workers::Processes {
            bridge,
            pool,
            supervisor,
        })
    }

    fn start_inline(&self) -> Result<Workers> {
        let state = Arc::clone(&self.state);
        let executor = Arc::clone(&self.executor);
        let poll_interval = self.config.poll_interval;
        let thread = thread::Builder::new()
            .name("inline-worker".to_string())
            .spawn(move || {
                let executor: &dyn Executor = executor.as_ref();
                if let Err(e) = worker::worker_loop(state.as_ref(), executor, poll_interval) {
                    error!(error = %e, "Inline worker stopped");
                }
            })?;
        info!("Serving requests inline");
        Ok(Workers::Inline { thread })
    }

    fn cancel(&self, request: &Request) {
        let id = request
            .params
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        match id {
            Some(id) => {
                debug!(request_id = %id, "Cancelling request");
                self.state.cancel_job(&id);
            }
            None => debug!(params = %request.params, "Ignoring malformed cancel"),
        }
    }

    fn enqueue(&self, request: Request) {
        let method = request.method.clone();
        if let Err(e) = self.state.push_request(request) {
            warn!(method = %method, error = %e, "Could not queue request");
        }
    }

    fn shutdown(&mut self, request: Request) {
        info!("Shutting down");
        self.teardown();
        self.phase = Phase::ShuttingDown;
        self.finalizer
            .finalize(&self.state, self.writer.as_ref(), &request, &JobResult::null());
    }

    /// Stop everything, in order: supervision, the queue, the Responder, the
    /// document store, the workers, and finally the bridge.
    fn teardown(&mut self) {
        if let Some(Workers::Processes { supervisor, .. }) = &mut self.workers {
            supervisor.stop();
        }
        self.state.shutdown();
        if let Some(mut responder) = self.responder.take() {
            responder.join();
        }
        self.state.with_store(|store| store.clear());

        match self.workers.take() {
            Some(Workers::Processes {
                mut bridge, pool, ..
            }) => {
                let mut pool = pool.lock().unwrap_or_else(PoisonError::into_inner);
                debug!(alive = pool.alive(), "Waiting for workers to exit");
                let exits = pool.wait_all(self.config.shutdown_timeout);
                for (worker_id, reason) in exits {
                    if reason.is_success() {
                        debug!(worker_id, "Worker exited");
                    } else {
                        warn!(worker_id, reason = %reason, "Worker did not exit cleanly");
                    }
                }
                bridge.stop();
            }
            Some(Workers::Inline { thread }) => {
                if thread.join().is_err() {
                    error!("Inline worker panicked");
                }
            }
            None => {}
        }
    }

    /// Exit status: 0 if no document is open, 1 otherwise. A prior `shutdown`
    /// always leaves the store empty.
    fn exit(&mut self) -> i32 {
        let status = if self.state.with_store(|store| store.is_empty()) {
            0
        } else {
            1
        };
        if !matches!(self.phase, Phase::ShuttingDown | Phase::Exited) {
            self.teardown();
        }
        self.phase = Phase::Exited;
        info!(status, "Exiting");
        status
    }
}

#[cfg(test)]
impl Server {
    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Arc::new(finalizer);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &Arc<QueueState> {
        &self.state
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if !matches!(self.phase, Phase::ShuttingDown | Phase::Exited) {
            self.teardown();
        }
    }
}

/// Boot extensions and serve LSP over stdio. Returns the exit status.
pub fn run_server(config: ServerConfig) -> i32 {
    let boot = extensions::boot(&config.boot);
    for failure in &boot.errors {
        warn!(error = %failure, "Extension failed to load");
    }
    let executor = FeatureExecutor::new(boot.registry, boot.errors);
    let writer: Arc<dyn MessageWriter> = Arc::new(FramedWriter::new(std::io::stdout()));

    info!(
        workers = config.workers,
        order = ?config.queue_order,
        "Language server starting"
    );
    let server = Server::new(config, executor, writer);
    server.run(std::io::stdin().lock())
}
