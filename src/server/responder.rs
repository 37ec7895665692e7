//! The Responder thread: drains the response queue and finalizes each result.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use super::finalize::Finalizer;
use crate::error::{LanternError, Result};
use crate::protocol::transport::MessageWriter;
use crate::queue::QueueState;

pub struct Responder {
    thread: Option<JoinHandle<()>>,
}

impl Responder {
    /// Start polling. The thread ends when the queue is shut down.
    pub fn start(
        state: Arc<QueueState>,
        writer: Arc<dyn MessageWriter>,
        finalizer: Arc<Finalizer>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let thread = thread::Builder::new()
            .name("responder".to_string())
            .spawn(move || {
                loop {
                    match state.pop_response() {
                        Ok(Some((request, result))) => {
                            finalizer.finalize(&state, writer.as_ref(), &request, &result);
                        }
                        Ok(None) => thread::sleep(poll_interval),
                        Err(LanternError::QueueClosed) => break,
                        Err(e) => {
                            error!(error = %e, "Responder stopped");
                            break;
                        }
                    }
                }
                debug!("Responder finished");
            })
            .map_err(|e| LanternError::Worker(format!("Failed to start responder: {}", e)))?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Wait for the thread to finish. Only returns once the queue is closed.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Responder thread panicked");
        }
    }
}
