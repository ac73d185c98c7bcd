//! Relocation of layers onto one dedicated worker thread.
//!
//! Every call into a relocated layer is packaged as a job, queued to the
//! worker and answered through a oneshot reply the caller blocks on. Calls
//! that already run on the worker execute inline, so a layer calling back
//! into the registry from its own thread cannot deadlock.

use std::{
    collections::BTreeSet,
    sync::Arc,
    thread::{self, ThreadId},
};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::{
    Path, Result, Value, ValueSpaceError,
    layer::{Handle, Layer, LayerEvent, LayerId, LayerOptions, WriterId},
};

type Job = Box<dyn FnOnce() + Send>;

/// A thread that runs queued jobs in order.
pub struct LayerWorker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread_id: ThreadId,
    thread: Option<thread::JoinHandle<()>>,
}

impl LayerWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    /// Returns `ValueSpaceError::WorkerUnavailable` if the thread cannot be
    /// spawned.
    pub fn spawn() -> Result<Arc<Self>> {
        let (jobs, mut job_rx) = mpsc::unbounded_channel::<Job>();

        let thread = thread::Builder::new()
            .name("layer-worker".to_string())
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    job();
                }
                debug!("Layer worker stopped");
            })
            .map_err(|e| ValueSpaceError::WorkerUnavailable(e.to_string()))?;

        Ok(Arc::new(Self {
            jobs: Some(jobs),
            thread_id: thread.thread().id(),
            thread: Some(thread),
        }))
    }

    /// Whether the calling thread is the worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `job` on the worker and waits for its result.
    ///
    /// Returns `None` if the worker has stopped.
    pub fn call<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Some(job());
        }

        let (reply, response) = oneshot::channel();
        let jobs = self.jobs.as_ref()?;
        let queued = jobs.send(Box::new(move || {
            let _ = reply.send(job());
        }));
        if queued.is_err() {
            warn!("Layer worker is gone");
            return None;
        }

        futures::executor::block_on(response).ok()
    }
}

impl Drop for LayerWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if !self.is_current() {
                let _ = thread.join();
            }
        }
    }
}

/// A layer whose every call runs on a [`LayerWorker`].
pub struct WorkerLayer {
    inner: Arc<dyn Layer>,
    worker: Arc<LayerWorker>,
    id: LayerId,
    name: String,
    order: u32,
    options: LayerOptions,
}

impl WorkerLayer {
    /// Relocates `inner` onto `worker`.
    pub fn new(inner: Arc<dyn Layer>, worker: Arc<LayerWorker>) -> Self {
        Self {
            id: inner.id(),
            name: inner.name().to_string(),
            order: inner.order(),
            options: inner.options(),
            inner,
            worker,
        }
    }

    fn run<R, F>(&self, fallback: R, op: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&dyn Layer) -> R + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        match self.worker.call(move || op(inner.as_ref())) {
            Some(result) => result,
            None => {
                warn!(layer = %self.name, "Layer call dropped, worker unavailable");
                fallback
            }
        }
    }
}

impl Layer for WorkerLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn options(&self) -> LayerOptions {
        self.options
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let path = path.clone();
        self.run(None, move |layer| layer.open(parent, &path))
    }

    fn release(&self, handle: Handle) {
        self.run((), move |layer| layer.release(handle));
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let sub_path = sub_path.clone();
        self.run(None, move |layer| layer.read_value(handle, &sub_path))
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        self.run(BTreeSet::new(), move |layer| layer.children(handle))
    }

    fn write_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path, value: Value) -> bool {
        let (writer, sub_path) = (writer.clone(), sub_path.clone());
        self.run(false, move |layer| {
            layer.write_value(&writer, handle, &sub_path, value)
        })
    }

    fn remove_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let (writer, sub_path) = (writer.clone(), sub_path.clone());
        self.run(false, move |layer| layer.remove_value(&writer, handle, &sub_path))
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        let writer = writer.clone();
        self.run(false, move |layer| layer.remove_subtree(&writer, handle))
    }

    fn supports_interest_notification(&self) -> bool {
        self.inner.supports_interest_notification()
    }

    fn set_interest(&self, handle: Handle, enabled: bool) -> bool {
        self.run(false, move |layer| layer.set_interest(handle, enabled))
    }

    fn add_watch(&self, handle: Handle) -> bool {
        self.run(false, move |layer| layer.add_watch(handle))
    }

    fn remove_watches(&self, handle: Handle) {
        self.run((), move |layer| layer.remove_watches(handle));
    }

    fn sync(&self) {
        self.run((), |layer| layer.sync());
    }

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.inner.events()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn jobs_run_on_the_worker_thread() {
        let worker = LayerWorker::spawn().unwrap();
        let caller = thread::current().id();

        let ran_on = worker.call(|| thread::current().id()).unwrap();

        assert_ne!(ran_on, caller);
        assert_eq!(ran_on, worker.thread_id);
    }

    #[test]
    fn nested_calls_run_inline() {
        let worker = LayerWorker::spawn().unwrap();
        let inner = Arc::clone(&worker);

        let result = worker.call(move || inner.call(|| 7)).unwrap();

        assert_eq!(result, Some(7));
    }

    #[test]
    fn jobs_keep_submission_order() {
        let worker = LayerWorker::spawn().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            worker.call(move || seen.lock().unwrap().push(i));
        }

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
