//! Remote-object bridge between worker processes and the shared queue state.
//!
//! The main process owns the one [`QueueState`] and runs a coordinator on a
//! Unix socket. Each worker holds a [`RemoteQueue`] proxy whose methods are
//! synchronous round trips to that coordinator, so a crashed worker can never
//! leave the shared state half-updated.
//!
//! ```text
//!   worker 1 ─┐
//!   worker 2 ─┼──▶ bridge.sock ──▶ coordinator thread per connection ──▶ QueueState
//!   worker N ─┘
//! ```

mod ipc;
mod protocol;

use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lsp_types::{TextDocumentContentChangeEvent, Url};
use tempfile::TempDir;
use tracing::{debug, trace, warn};

use crate::error::{LanternError, Result};
use crate::protocol::{Request, RequestId};
use crate::queue::{Job, JobResult, JobSource, QueueState};
use crate::store::{self, Document, Documents, StoreSettings};
use ipc::{LineReader, LineWriter};
pub use protocol::{BridgeCall, BridgeReply};

/// How long the accept loop sleeps when no worker is connecting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Coordinator side of the bridge.
pub struct Bridge {
    socket_path: PathBuf,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<Connection>>>,
    // Removed (with the socket) on drop.
    _dir: TempDir,
}

struct Connection {
    stream: UnixStream,
    thread: JoinHandle<()>,
}

impl Bridge {
    /// Expose `state` on a fresh socket in a private temporary directory.
    pub fn start(state: Arc<QueueState>) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("lantern-").tempdir()?;
        let socket_path = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let stop = Arc::clone(&stop);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("bridge-accept".to_string())
                .spawn(move || accept_loop(listener, state, stop, connections))?
        };

        debug!(socket = %socket_path.display(), "Bridge started");
        Ok(Self {
            socket_path,
            stop,
            accept_thread: Some(accept_thread),
            connections,
            _dir: dir,
        })
    }

    /// The address workers pass to [`RemoteQueue::connect`].
    pub fn handle(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, hang up on every worker and join all bridge threads.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }

        let connections = std::mem::take(
            &mut *self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for connection in &connections {
            let _ = connection.stream.shutdown(Shutdown::Both);
        }
        let count = connections.len();
        for connection in connections {
            let _ = connection.thread.join();
        }
        debug!(connections = count, "Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.accept_thread.is_some() {
            self.stop();
        }
    }
}

fn accept_loop(
    listener: UnixListener,
    state: Arc<QueueState>,
    stop: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<Connection>>>,
) {
    let mut next_id = 0usize;
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                next_id += 1;
                if let Err(e) = register(next_id, stream, &state, &connections) {
                    warn!(connection = next_id, error = %e, "Failed to serve bridge connection");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!(error = %e, "Bridge accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn register(
    id: usize,
    stream: UnixStream,
    state: &Arc<QueueState>,
    connections: &Mutex<Vec<Connection>>,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    let control = stream.try_clone()?;
    let (reader, writer) = ipc::split(stream)?;
    let state = Arc::clone(state);
    let thread = thread::Builder::new()
        .name(format!("bridge-conn-{}", id))
        .spawn(move || serve_connection(id, reader, writer, &state))?;

    connections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Connection {
            stream: control,
            thread,
        });
    trace!(connection = id, "Bridge connection accepted");
    Ok(())
}

fn serve_connection(id: usize, mut reader: LineReader, mut writer: LineWriter, state: &QueueState) {
    loop {
        let reply = match reader.read_line() {
            Ok(Some(line)) => match protocol::from_line::<BridgeCall>(line) {
                Ok(call) => dispatch(state, call),
                Err(e) => BridgeReply::Failed {
                    message: format!("Invalid bridge call: {}", e),
                },
            },
            Ok(None) => break,
            Err(e) => {
                debug!(connection = id, error = %e, "Bridge connection read failed");
                break;
            }
        };

        let sent = protocol::to_line(&reply)
            .and_then(|line| writer.write_line(&line).map_err(LanternError::from));
        if let Err(e) = sent {
            debug!(connection = id, error = %e, "Bridge connection write failed");
            break;
        }
    }
    trace!(connection = id, "Bridge connection closed");
}

/// Run one call against the real state.
fn dispatch(state: &QueueState, call: BridgeCall) -> BridgeReply {
    let outcome = match call {
        BridgeCall::PopRequest => state.pop_request().map(|job| BridgeReply::Job { job }),
        BridgeCall::RemoveJobHandle { id } => {
            state.remove_job_handle(&id);
            Ok(BridgeReply::Done)
        }
        BridgeCall::PushResponse { request, result } => state
            .push_response(request, result)
            .map(|()| BridgeReply::Done),
        BridgeCall::Document { uri } => state
            .document(&uri)
            .map(|document| BridgeReply::Document { document }),
        BridgeCall::OpenDocument { document } => state
            .open_document(store::document_from_wire(document))
            .map(|()| BridgeReply::Done),
        BridgeCall::ChangeDocument {
            uri,
            version,
            changes,
        } => state
            .change_document(&uri, version, changes)
            .map(|()| BridgeReply::Done),
        BridgeCall::CloseDocument { uri } => {
            state.close_document(&uri).map(|()| BridgeReply::Done)
        }
        BridgeCall::Settings => state
            .settings()
            .map(|settings| BridgeReply::Settings { settings }),
        BridgeCall::UpdateSettings { settings } => state
            .update_settings(settings)
            .map(|()| BridgeReply::Done),
    };
    outcome.unwrap_or_else(BridgeReply::from_error)
}

/// Worker-side proxy for the shared queue state.
///
/// Every method forwards synchronously to the coordinator. A lost connection
/// surfaces as [`LanternError::Bridge`].
pub struct RemoteQueue {
    channel: Mutex<(LineReader, LineWriter)>,
}

impl RemoteQueue {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| {
            LanternError::Bridge(format!("Failed to connect to {}: {}", path.display(), e))
        })?;
        Ok(Self {
            channel: Mutex::new(ipc::split(stream)?),
        })
    }

    fn call(&self, call: &BridgeCall) -> Result<BridgeReply> {
        let mut channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        let (reader, writer) = &mut *channel;

        writer
            .write_line(&protocol::to_line(call)?)
            .map_err(|e| LanternError::Bridge(format!("Failed to send call: {}", e)))?;

        let line = reader
            .read_line()
            .map_err(|e| LanternError::Bridge(format!("Failed to read reply: {}", e)))?
            .ok_or_else(|| LanternError::Bridge("Coordinator closed the connection".into()))?;
        protocol::from_line::<BridgeReply>(line)?.into_result()
    }

    fn expect_done(&self, call: &BridgeCall) -> Result<()> {
        match self.call(call)? {
            BridgeReply::Done => Ok(()),
            other => Err(unexpected(call, &other)),
        }
    }
}

fn unexpected(call: &BridgeCall, reply: &BridgeReply) -> LanternError {
    LanternError::Bridge(format!("Unexpected reply {:?} to {:?}", reply, call))
}

impl Documents for RemoteQueue {
    fn document(&self, uri: &Url) -> Result<Option<Document>> {
        let call = BridgeCall::Document { uri: uri.clone() };
        match self.call(&call)? {
            BridgeReply::Document { document } => Ok(document.map(store::document_from_wire)),
            other => Err(unexpected(&call, &other)),
        }
    }

    fn open_document(&self, document: Document) -> Result<()> {
        self.expect_done(&BridgeCall::OpenDocument { document })
    }

    fn change_document(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        self.expect_done(&BridgeCall::ChangeDocument {
            uri: uri.clone(),
            version,
            changes,
        })
    }

    fn close_document(&self, uri: &Url) -> Result<()> {
        self.expect_done(&BridgeCall::CloseDocument { uri: uri.clone() })
    }

    fn settings(&self) -> Result<StoreSettings> {
        let call = BridgeCall::Settings;
        match self.call(&call)? {
            BridgeReply::Settings { settings } => Ok(settings),
            other => Err(unexpected(&call, &other)),
        }
    }

    fn update_settings(&self, settings: StoreSettings) -> Result<()> {
        self.expect_done(&BridgeCall::UpdateSettings { settings })
    }
}

impl JobSource for RemoteQueue {
    fn pop_request(&self) -> Result<Option<Job>> {
        let call = BridgeCall::PopRequest;
        match self.call(&call)? {
            BridgeReply::Job { job } => Ok(job),
            other => Err(unexpected(&call, &other)),
        }
    }

    fn remove_job_handle(&self, id: &RequestId) -> Result<()> {
        self.expect_done(&BridgeCall::RemoveJobHandle { id: id.clone() })
    }

    fn push_response(&self, request: Request, result: JobResult) -> Result<()> {
        self.expect_done(&BridgeCall::PushResponse { request, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOrder;
    use crate::store::DocumentStore;
    use serde_json::json;

    fn shared_state() -> Arc<QueueState> {
        Arc::new(QueueState::new(DocumentStore::new(2), QueueOrder::Fifo))
    }

    #[test]
    fn test_proxy_forwards_to_the_one_instance() {
        let state = shared_state();
        let mut bridge = Bridge::start(Arc::clone(&state)).unwrap();
        let remote = RemoteQueue::connect(bridge.handle()).unwrap();

        state
            .push_request(Request::new(1, "textDocument/hover", json!({})))
            .unwrap();
        state.cancel_job(&RequestId::Number(1));

        let job = remote.pop_request().unwrap().unwrap();
        assert!(job.cancelled);
        remote.remove_job_handle(&RequestId::Number(1)).unwrap();
        assert!(remote.pop_request().unwrap().is_none());

        remote
            .push_response(job.request, JobResult::null())
            .unwrap();
        let (request, result) = state.pop_response().unwrap().unwrap();
        assert_eq!(request.id, Some(RequestId::Number(1)));
        assert_eq!(result, JobResult::null());

        bridge.stop();
    }

    #[test]
    fn test_documents_through_proxy() {
        let state = shared_state();
        let bridge = Bridge::start(Arc::clone(&state)).unwrap();
        let remote = RemoteQueue::connect(bridge.handle()).unwrap();
        let uri = Url::parse("file:///tmp/proxy.rs").unwrap();

        state
            .open_document(Document::new(uri.clone(), "one\ntwo", 3))
            .unwrap();
        let doc = remote.document(&uri).unwrap().unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.line(1), Some("two"));
        assert_eq!(remote.settings().unwrap().worker_count, 2);

        remote.close_document(&uri).unwrap();
        assert!(matches!(
            remote.close_document(&uri),
            Err(LanternError::DocumentNotOpen(_))
        ));
        assert!(state.with_store(|s| s.is_empty()));
    }

    #[test]
    fn test_closed_queue_reaches_the_worker() {
        let state = shared_state();
        let bridge = Bridge::start(Arc::clone(&state)).unwrap();
        let remote = RemoteQueue::connect(bridge.handle()).unwrap();

        state.shutdown();
        assert!(matches!(
            remote.pop_request(),
            Err(LanternError::QueueClosed)
        ));
    }

    #[test]
    fn test_stop_hangs_up_on_workers() {
        let state = shared_state();
        let mut bridge = Bridge::start(Arc::clone(&state)).unwrap();
        let remote = RemoteQueue::connect(bridge.handle()).unwrap();
        assert!(remote.pop_request().unwrap().is_none());

        bridge.stop();
        assert!(matches!(remote.pop_request(), Err(LanternError::Bridge(_))));
    }
}
