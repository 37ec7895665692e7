use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lsp_types::{TextDocumentContentChangeEvent, Url};

use super::job::{Job, JobResult};
use crate::error::{LanternError, Result};
use crate::protocol::{Request, RequestId};
use crate::store::{Document, DocumentStore, Documents, StoreSettings};

/// Which end of a queue `pop` takes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueOrder {
    /// Oldest first.
    #[default]
    Fifo,
    /// Newest first.
    Lifo,
}

struct Inner {
    store: DocumentStore,
    requests: VecDeque<Request>,
    responses: VecDeque<(Request, JobResult)>,
    /// Cancellation flags for jobs that are queued and not yet claimed.
    jobs: HashMap<RequestId, bool>,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(LanternError::QueueClosed)
        } else {
            Ok(())
        }
    }
}

/// The one shared instance of queues, cancellation index and document store.
pub struct QueueState {
    inner: Mutex<Inner>,
    order: QueueOrder,
}

impl QueueState {
    pub fn new(store: DocumentStore, order: QueueOrder) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                requests: VecDeque::new(),
                responses: VecDeque::new(),
                jobs: HashMap::new(),
                closed: false,
            }),
            order,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take<T>(&self, queue: &mut VecDeque<T>) -> Option<T> {
        match self.order {
            QueueOrder::Fifo => queue.pop_front(),
            QueueOrder::Lifo => queue.pop_back(),
        }
    }

    /// Queue a request and make it cancellable by id.
    pub fn push_request(&self, request: Request) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        if let Some(id) = &request.id {
            inner.jobs.insert(id.clone(), false);
        }
        inner.requests.push_back(request);
        Ok(())
    }

    /// Claim the next job, or `None` when the queue is empty.
    ///
    /// The job's id stays in the cancellation index until the claimer calls
    /// [`JobSource::remove_job_handle`].
    pub fn pop_request(&self) -> Result<Option<Job>> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        let Some(request) = self.take(&mut inner.requests) else {
            return Ok(None);
        };
        let cancelled = request
            .id
            .as_ref()
            .and_then(|id| inner.jobs.get(id).copied())
            .unwrap_or(false);
        Ok(Some(Job { request, cancelled }))
    }

    pub fn remove_job_handle(&self, id: &RequestId) {
        self.lock().jobs.remove(id);
    }

    /// Flag a queued job as cancelled. Ids that were already claimed are ignored.
    pub fn cancel_job(&self, id: &RequestId) {
        if let Some(cancelled) = self.lock().jobs.get_mut(id) {
            *cancelled = true;
        }
    }

    pub fn push_response(&self, request: Request, result: JobResult) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.responses.push_back((request, result));
        Ok(())
    }

    pub fn pop_response(&self) -> Result<Option<(Request, JobResult)>> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        Ok(self.take(&mut inner.responses))
    }

    /// Close both queues for good and drop whatever is still in them.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.requests.clear();
        inner.responses.clear();
        inner.jobs.clear();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub fn pending_requests(&self) -> usize {
        self.lock().requests.len()
    }

    #[cfg(test)]
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Run `f` while holding the state lock. Nothing else can touch the
    /// queues or the store until it returns.
    pub fn synchronize<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock();
        f()
    }

    pub fn with_store<T>(&self, f: impl FnOnce(&mut DocumentStore) -> T) -> T {
        f(&mut self.lock().store)
    }
}

impl Documents for QueueState {
    fn document(&self, uri: &Url) -> Result<Option<Document>> {
        Ok(self.lock().store.get(uri).cloned())
    }

    fn open_document(&self, document: Document) -> Result<()> {
        self.lock().store.insert(document);
        Ok(())
    }

    fn change_document(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        self.lock().store.change(uri, version, changes)
    }

    fn close_document(&self, uri: &Url) -> Result<()> {
        self.lock().store.remove(uri).map(|_| ())
    }

    fn settings(&self) -> Result<StoreSettings> {
        Ok(self.lock().store.settings().clone())
    }

    fn update_settings(&self, settings: StoreSettings) -> Result<()> {
        self.lock().store.set_settings(settings);
        Ok(())
    }
}

/// The worker-side view of the queue: claim, release and respond.
pub trait JobSource: Documents {
    fn pop_request(&self) -> Result<Option<Job>>;
    fn remove_job_handle(&self, id: &RequestId) -> Result<()>;
    fn push_response(&self, request: Request, result: JobResult) -> Result<()>;
}

impl JobSource for QueueState {
    fn pop_request(&self) -> Result<Option<Job>> {
        QueueState::pop_request(self)
    }

    fn remove_job_handle(&self, id: &RequestId) -> Result<()> {
        QueueState::remove_job_handle(self, id);
        Ok(())
    }

    fn push_response(&self, request: Request, result: JobResult) -> Result<()> {
        QueueState::push_response(self, request, result)
    }
}
