use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::callback::{CallbackSlot, TextRequest};
use super::{RequestDescriptor, RequestId};

/// Unit of work travelling from `submit` to exactly one worker.
pub(crate) struct Job {
    pub(crate) id: RequestId,
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) slot: CallbackSlot,
}

impl Job {
    /// Rebuild the request this job was made from, unless its callback
    /// already ran.
    pub(crate) fn into_request(self) -> Option<TextRequest> {
        let descriptor = self.descriptor;
        self.slot
            .into_callback()
            .map(|callback| TextRequest::from_parts(descriptor, callback))
    }
}

/// Why [`WorkerPool::enqueue`] did not queue an item.
pub(crate) enum Refused<T> {
    /// The queue was closed by shutdown.
    Closed(T),
    /// The workers are gone, typically because their runtime was dropped.
    Stopped(Job),
}

/// FIFO queue drained by a fixed number of worker tasks.
///
/// Workers share one receiver behind an async mutex, so dequeue order is
/// submission order and at most `size` jobs run at once. Closing the queue
/// drops the sender: workers keep draining what is already buffered and exit
/// once it is empty.
pub(crate) struct WorkerPool {
    sender: StdMutex<Option<UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn spawn<F, Fut>(handle: &Handle, size: NonZeroUsize, run: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let run = Arc::new(run);

        let workers = (0..size.get())
            .map(|index| handle.spawn(worker_loop(index, receiver.clone(), run.clone())))
            .collect();

        info!("Started worker pool with {} workers", size);

        Self {
            sender: StdMutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue `item` after converting it with `into_job`.
    ///
    /// The conversion runs under the sender lock, so it never happens for an
    /// item that ends up refused. A closed queue hands `item` back untouched.
    /// If every worker is gone the converted job comes back instead, and the
    /// queue closes for good.
    pub(crate) fn enqueue<T, F>(&self, item: T, into_job: F) -> Result<(), Refused<T>>
    where
        F: FnOnce(T) -> Job,
    {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let rejected = match sender.as_ref() {
            Some(open) => match open.send(into_job(item)) {
                Ok(()) => return Ok(()),
                Err(rejected) => rejected.0,
            },
            None => return Err(Refused::Closed(item)),
        };
        sender.take();
        drop(sender);

        error!("No worker left to run request {}", rejected.id);
        Err(Refused::Stopped(rejected))
    }

    /// Stop accepting jobs. Returns `false` if the queue was already closed.
    pub(crate) fn close(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Wait for every worker to exit. Concurrent callers all return only once
    /// the pool has fully stopped.
    pub(crate) async fn join(&self) {
        let mut workers = self.workers.lock().await;
        // A handle is only removed once it resolved, so a cancelled `join`
        // leaves the rest for the next caller.
        while let Some(worker) = workers.last_mut() {
            let result = worker.await;
            workers.pop();
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop<F, Fut>(index: usize, queue: Arc<Mutex<UnboundedReceiver<Job>>>, run: Arc<F>)
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let next = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };

        match next {
            Some(job) => (*run)(job).await,
            None => break,
        }
    }

    debug!("Worker {} stopped", index);
}
