use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::callback::CallbackSlot;
use super::queue::{Job, Refused, WorkerPool};
use super::{
    Completion, RequestDescriptor, RequestId, RequestInfo, SubmitError, TextRequest, TextResponse,
};
use crate::ports::{TrackingPort, TransportPort};

/// What `submit` does once shutdown has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitPolicy {
    /// Return `SubmitError::AlreadyShuttingDown` with the request.
    Reject,
    /// Accept the call and report a failure through the callback.
    Ignore,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        SubmitPolicy::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run every request already queued.
    Drain,
    /// Let in-flight requests finish, fail the ones still queued.
    Cancel,
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub pool_size: NonZeroUsize,
    pub after_shutdown: SubmitPolicy,
}

impl DispatcherOptions {
    pub const DEFAULT_POOL_SIZE: usize = 4;
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            pool_size: NonZeroUsize::new(Self::DEFAULT_POOL_SIZE).unwrap_or(NonZeroUsize::MIN),
            after_shutdown: SubmitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    pending: AtomicUsize,
}

/// Settles the counters and tracking of one request. Dropping it unsettled,
/// e.g. when the worker task is aborted, records a failure.
struct Outcome {
    id: RequestId,
    counters: Arc<Counters>,
    tracker: Arc<dyn TrackingPort>,
    settled: bool,
}

impl Outcome {
    fn settle(mut self, completion: Completion) {
        self.record(completion);
    }

    fn record(&mut self, completion: Completion) {
        if self.settled {
            return;
        }
        self.settled = true;

        match completion {
            Completion::Success => self.counters.completed.fetch_add(1, Ordering::SeqCst),
            Completion::Failure => self.counters.failed.fetch_add(1, Ordering::SeqCst),
        };
        self.tracker.mark_completed(self.id, completion);
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for Outcome {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Request {} abandoned by its worker", self.id);
            self.record(Completion::Failure);
        }
    }
}

/// Runs one job on a worker: transport call, bookkeeping, callback.
struct Executor {
    transport: Arc<dyn TransportPort>,
    tracker: Arc<dyn TrackingPort>,
    counters: Arc<Counters>,
    cancelled: Arc<AtomicBool>,
}

impl Executor {
    async fn run(&self, job: Job) {
        let Job { id, descriptor, slot } = job;
        // Declared after `slot` so it drops first: bookkeeping settles before
        // the callback fires.
        let outcome = Outcome {
            id,
            counters: self.counters.clone(),
            tracker: self.tracker.clone(),
            settled: false,
        };
        self.tracker.mark_in_flight(id);

        let response = if self.cancelled.load(Ordering::SeqCst) {
            debug!("Request {} cancelled by shutdown", id);
            None
        } else {
            self.call_transport(id, &descriptor).await
        };

        let response = match response {
            Some(response) => {
                outcome.settle(Completion::Success);
                response
            }
            None => {
                outcome.settle(Completion::Failure);
                TextResponse::failure()
            }
        };

        slot.complete(response.status, response.body);
    }

    async fn call_transport(&self, id: RequestId, descriptor: &RequestDescriptor) -> Option<TextResponse> {
        debug!("{} {} (request {})", descriptor.method(), descriptor.uri(), id);

        match AssertUnwindSafe(self.transport.execute(descriptor)).catch_unwind().await {
            Ok(Ok(response)) => {
                debug!("{} {} -> {}", descriptor.method(), descriptor.uri(), response.status);
                Some(response)
            }
            Ok(Err(e)) => {
                warn!("{} {} failed ({}): {}", descriptor.method(), descriptor.uri(), e.kind, e);
                None
            }
            Err(_) => {
                error!("Transport panicked while handling request {}", id);
                None
            }
        }
    }
}

struct Inner {
    handle: Handle,
    pool: WorkerPool,
    tracker: Arc<dyn TrackingPort>,
    counters: Arc<Counters>,
    cancelled: Arc<AtomicBool>,
    after_shutdown: SubmitPolicy,
}

/// Accepts requests and runs them on a bounded pool of workers.
///
/// Results only ever come back through each request's callback, which runs
/// exactly once on a worker task, never inside `submit`. Completion order is
/// not submission order. Cloning the dispatcher gives another handle to the
/// same pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawn the worker pool on `handle`.
    pub fn new(
        handle: Handle,
        options: DispatcherOptions,
        transport: Arc<dyn TransportPort>,
        tracker: Arc<dyn TrackingPort>,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        let executor = Arc::new(Executor {
            transport,
            tracker: tracker.clone(),
            counters: counters.clone(),
            cancelled: cancelled.clone(),
        });

        let pool = WorkerPool::spawn(&handle, options.pool_size, move |job| {
            let executor = executor.clone();
            async move { executor.run(job).await }
        });

        Self {
            inner: Arc::new(Inner {
                handle,
                pool,
                tracker,
                counters,
                cancelled,
                after_shutdown: options.after_shutdown,
            }),
        }
    }

    /// Like [`Dispatcher::new`] on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn start(
        options: DispatcherOptions,
        transport: Arc<dyn TransportPort>,
        tracker: Arc<dyn TrackingPort>,
    ) -> Self {
        Self::new(Handle::current(), options, transport, tracker)
    }

    /// Queue a request and return immediately.
    ///
    /// Safe to call from any thread, inside or outside the runtime.
    pub fn submit(&self, request: TextRequest) -> Result<RequestId, SubmitError> {
        let inner = &self.inner;
        let id = RequestId::new();

        let queued = inner.pool.enqueue(request, |request| {
            let (descriptor, callback) = request.into_parts();
            inner.tracker.track_request(RequestInfo::new(
                id,
                descriptor.method(),
                descriptor.uri().to_string(),
            ));
            inner.counters.submitted.fetch_add(1, Ordering::SeqCst);
            inner.counters.pending.fetch_add(1, Ordering::SeqCst);
            Job {
                id,
                descriptor,
                slot: CallbackSlot::new(id, callback),
            }
        });

        match queued {
            Ok(()) => {
                debug!("Queued request {}", id);
                Ok(id)
            }
            Err(Refused::Closed(request)) => self.refuse(id, request),
            Err(Refused::Stopped(job)) => {
                inner.tracker.forget(id);
                inner.counters.submitted.fetch_sub(1, Ordering::SeqCst);
                inner.counters.pending.fetch_sub(1, Ordering::SeqCst);
                match job.into_request() {
                    Some(request) => self.refuse(id, request),
                    None => Ok(id),
                }
            }
        }
    }

    /// Submit `descriptor` and wait for its outcome.
    ///
    /// Transport failures resolve to a response carrying [`FAILURE_STATUS`](super::FAILURE_STATUS).
    pub async fn fetch(&self, descriptor: RequestDescriptor) -> Result<TextResponse, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.submit(TextRequest::from_descriptor(descriptor, move |status, body| {
            let _ = tx.send(TextResponse::new(status, body));
        }))?;

        Ok(rx.await.unwrap_or_else(|_| TextResponse::failure()))
    }

    /// Stop accepting requests and wait until every worker has finished.
    ///
    /// Every request accepted before this call gets its callback invoked
    /// before `shutdown` returns. Calling it again, or concurrently, waits for
    /// the same completion.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Cancel {
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }

        if self.inner.pool.close() {
            info!(
                "Shutting down dispatcher ({:?}), {} requests pending",
                mode,
                self.inner.counters.pending.load(Ordering::SeqCst)
            );
        }

        self.inner.pool.join().await;
        debug!("Dispatcher workers stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.pool.is_closed()
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.inner.counters;
        DispatcherStats {
            submitted: counters.submitted.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            pending: counters.pending.load(Ordering::SeqCst),
        }
    }

    fn refuse(&self, id: RequestId, request: TextRequest) -> Result<RequestId, SubmitError> {
        match self.inner.after_shutdown {
            SubmitPolicy::Reject => {
                warn!(
                    "Rejected {} {}: dispatcher is shutting down",
                    request.method(),
                    request.uri()
                );
                Err(SubmitError::AlreadyShuttingDown(request))
            }
            SubmitPolicy::Ignore => {
                let (descriptor, callback) = request.into_parts();
                match CallbackSlot::new(id, callback).fail_on(&self.inner.handle) {
                    Ok(()) => {
                        debug!(
                            "Ignored {} {}: dispatcher is shutting down",
                            descriptor.method(),
                            descriptor.uri()
                        );
                        Ok(id)
                    }
                    Err(slot) => {
                        warn!(
                            "Rejected {} {}: runtime is gone",
                            descriptor.method(),
                            descriptor.uri()
                        );
                        match slot.into_callback() {
                            Some(callback) => Err(SubmitError::AlreadyShuttingDown(TextRequest::from_parts(
                                descriptor, callback,
                            ))),
                            None => Ok(id),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RequestTracker;
    use crate::domain::{Headers, Method, RequestState, TransportError, TransportResult, FAILURE_STATUS};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    /// Answers `200` with the request body (or `ok`), fails for hosts named
    /// `unreachable` and panics for hosts named `panic`.
    struct MockTransport {
        delay: Duration,
        calls: Mutex<Vec<RequestDescriptor>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> Vec<RequestDescriptor> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransportPort for MockTransport {
        async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TextResponse> {
            self.calls.lock().unwrap().push(request.clone());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.uri().contains("://unreachable") {
                return Err(TransportError::connect("connection refused"));
            }
            if request.uri().contains("://panic") {
                panic!("transport blew up");
            }

            let body = match request.body() {
                Some(body) => String::from_utf8_lossy(body).into_owned(),
                None => "ok".to_string(),
            };
            Ok(TextResponse::new(200, body))
        }
    }

    fn dispatcher(transport: Arc<MockTransport>, pool_size: usize, policy: SubmitPolicy) -> (Dispatcher, Arc<RequestTracker>) {
        let tracker = Arc::new(RequestTracker::new());
        let options = DispatcherOptions {
            pool_size: NonZeroUsize::new(pool_size).unwrap(),
            after_shutdown: policy,
        };
        (Dispatcher::start(options, transport, tracker.clone()), tracker)
    }

    type Results = mpsc::UnboundedReceiver<(String, u16, String)>;

    fn collector() -> (mpsc::UnboundedSender<(String, u16, String)>, Results) {
        mpsc::unbounded_channel()
    }

    fn request(uri: &str, tx: &mpsc::UnboundedSender<(String, u16, String)>) -> TextRequest {
        let tx = tx.clone();
        let tag = uri.to_string();
        TextRequest::new(uri, Method::Get, move |status, body| {
            tx.send((tag, status, body)).unwrap();
        })
    }

    async fn drain(mut results: Results) -> Vec<(String, u16, String)> {
        let mut collected = Vec::new();
        while let Some(result) = timeout(Duration::from_secs(5), results.recv()).await.unwrap() {
            collected.push(result);
        }
        collected
    }

    #[tokio::test]
    async fn test_fetch_get_returns_status_and_body() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 2, SubmitPolicy::Reject);

        let response = dispatcher
            .fetch(RequestDescriptor::new("http://service/ok", Method::Get))
            .await
            .unwrap();

        assert_eq!(response, TextResponse::new(200, "ok"));
    }

    #[tokio::test]
    async fn test_each_callback_runs_exactly_once() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 2, SubmitPolicy::Reject);
        let (tx, results) = collector();

        dispatcher.submit(request("http://service/a", &tx)).unwrap();
        dispatcher.submit(request("http://unreachable/b", &tx)).unwrap();
        drop(tx);
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let mut collected = drain(results).await;
        collected.sort();
        assert_eq!(
            collected,
            vec![
                ("http://service/a".to_string(), 200, "ok".to_string()),
                ("http://unreachable/b".to_string(), FAILURE_STATUS, String::new()),
            ]
        );
        let stats = dispatcher.stats();
        assert_eq!((stats.submitted, stats.completed, stats.failed, stats.pending), (2, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_callback_never_runs_inside_submit() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 1, SubmitPolicy::Reject);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();

        dispatcher
            .submit(TextRequest::new("http://service/", Method::Get, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        // Single-threaded runtime: nothing else ran since submit returned.
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        dispatcher.shutdown(ShutdownMode::Drain).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_lose_nothing() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::from_millis(1)), 4, SubmitPolicy::Reject);
        let (tx, results) = collector();

        let submitters: Vec<_> = (0..8)
            .map(|thread| {
                let dispatcher = dispatcher.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        dispatcher
                            .submit(request(&format!("http://service/{}/{}", thread, n), &tx))
                            .unwrap();
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap();
        }
        drop(tx);
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let collected = drain(results).await;
        assert_eq!(collected.len(), 200);
        assert!(collected.iter().all(|(_, status, _)| *status == 200));
        assert_eq!(dispatcher.stats().completed, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_in_flight_transport_calls() {
        let transport = MockTransport::new(Duration::from_millis(20));
        let (dispatcher, _) = dispatcher(transport.clone(), 3, SubmitPolicy::Reject);

        for n in 0..12 {
            dispatcher
                .submit(TextRequest::new(format!("http://service/{}", n), Method::Get, |_, _| {}))
                .unwrap();
        }
        dispatcher.shutdown(ShutdownMode::Drain).await;

        assert_eq!(transport.calls().len(), 12);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_single_worker_dequeues_in_submission_order() {
        let transport = MockTransport::new(Duration::ZERO);
        let (dispatcher, _) = dispatcher(transport.clone(), 1, SubmitPolicy::Reject);

        let uris: Vec<String> = (0..10).map(|n| format!("http://service/{}", n)).collect();
        for uri in &uris {
            dispatcher
                .submit(TextRequest::new(uri.as_str(), Method::Get, |_, _| {}))
                .unwrap();
        }
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let seen: Vec<String> = transport.calls().iter().map(|c| c.uri().to_string()).collect();
        assert_eq!(seen, uris);
    }

    #[tokio::test]
    async fn test_body_and_headers_reach_transport_unchanged() {
        let transport = MockTransport::new(Duration::ZERO);
        let (dispatcher, _) = dispatcher(transport.clone(), 1, SubmitPolicy::Reject);
        let body = b"{\"x\":1}\x00\xff".to_vec();

        let echoed = dispatcher
            .fetch(RequestDescriptor::with_body(
                "http://service/echo",
                Method::Post,
                Headers::new().with("Content-Type", "application/json"),
                body.clone(),
            ))
            .await
            .unwrap();
        dispatcher
            .fetch(RequestDescriptor::new("http://service/plain", Method::Get))
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].body().map(|b| b.to_vec()), Some(body));
        assert_eq!(calls[0].headers().get_all("content-type").collect::<Vec<_>>(), vec!["application/json"]);
        assert_eq!(echoed.status, 200);
        assert!(calls[1].headers().is_empty());
        assert!(calls[1].body().is_none());
    }

    #[tokio::test]
    async fn test_drain_runs_every_queued_request() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::from_millis(5)), 1, SubmitPolicy::Reject);
        let (tx, results) = collector();

        for n in 0..5 {
            dispatcher.submit(request(&format!("http://service/{}", n), &tx)).unwrap();
        }
        drop(tx);
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let collected = drain(results).await;
        assert_eq!(collected.len(), 5);
        assert!(collected.iter().all(|(_, status, body)| *status == 200 && body == "ok"));
    }

    #[tokio::test]
    async fn test_cancel_completes_in_flight_and_fails_queued() {
        let transport = MockTransport::new(Duration::from_millis(50));
        let (dispatcher, _) = dispatcher(transport.clone(), 1, SubmitPolicy::Reject);
        let (tx, results) = collector();

        for n in 0..3 {
            dispatcher.submit(request(&format!("http://service/{}", n), &tx)).unwrap();
        }
        drop(tx);
        while transport.in_flight.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(1)).await;
        }
        dispatcher.shutdown(ShutdownMode::Cancel).await;

        let mut collected = drain(results).await;
        collected.sort();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].1, 200);
        assert_eq!(collected[1].1, FAILURE_STATUS);
        assert_eq!(collected[2].1, FAILURE_STATUS);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 1, SubmitPolicy::Reject);
        dispatcher.shutdown(ShutdownMode::Drain).await;
        assert!(dispatcher.is_shutting_down());

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        let rejected = dispatcher
            .submit(TextRequest::new("http://service/late", Method::Get, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();

        let request = rejected.into_request();
        assert_eq!(request.uri(), "http://service/late");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_ignored() {
        let transport = MockTransport::new(Duration::ZERO);
        let (dispatcher, _) = dispatcher(transport.clone(), 1, SubmitPolicy::Ignore);
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let response = timeout(
            Duration::from_secs(1),
            dispatcher.fetch(RequestDescriptor::new("http://service/late", Method::Get)),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(response, TextResponse::failure());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_panic_becomes_failure() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 1, SubmitPolicy::Reject);
        let (tx, results) = collector();

        dispatcher.submit(request("http://panic/", &tx)).unwrap();
        dispatcher.submit(request("http://service/after", &tx)).unwrap();
        drop(tx);
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let collected = drain(results).await;
        assert_eq!(
            collected,
            vec![
                ("http://panic/".to_string(), FAILURE_STATUS, String::new()),
                ("http://service/after".to_string(), 200, "ok".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_keeps_worker_alive() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::ZERO), 1, SubmitPolicy::Reject);

        dispatcher
            .submit(TextRequest::new("http://service/first", Method::Get, |_, _| {
                panic!("caller bug");
            }))
            .unwrap();
        let response = dispatcher
            .fetch(RequestDescriptor::new("http://service/second", Method::Get))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_tracker_sees_terminal_states() {
        let (dispatcher, tracker) = dispatcher(MockTransport::new(Duration::ZERO), 2, SubmitPolicy::Reject);

        let ok = dispatcher
            .submit(TextRequest::new("http://service/", Method::Get, |_, _| {}))
            .unwrap();
        let failed = dispatcher
            .submit(TextRequest::new("http://unreachable/", Method::Delete, |_, _| {}))
            .unwrap();
        dispatcher.shutdown(ShutdownMode::Drain).await;

        let snapshot = tracker.snapshot();
        let state_of = |id: RequestId| snapshot.iter().find(|info| info.id == id).map(|info| info.state);
        assert_eq!(state_of(ok), Some(RequestState::Completed(Completion::Success)));
        assert_eq!(state_of(failed), Some(RequestState::Completed(Completion::Failure)));
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_does_not_release_later_callers() {
        let (dispatcher, _) = dispatcher(MockTransport::new(Duration::from_millis(300)), 1, SubmitPolicy::Reject);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();

        dispatcher
            .submit(TextRequest::new("http://service/slow", Method::Get, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(timeout(Duration::from_millis(20), dispatcher.shutdown(ShutdownMode::Drain))
            .await
            .is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        dispatcher.shutdown(ShutdownMode::Drain).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().pending, 0);
    }

    #[test]
    fn test_submit_with_stopped_runtime_hands_request_back() {
        for policy in [SubmitPolicy::Reject, SubmitPolicy::Ignore].iter().copied() {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let tracker = Arc::new(RequestTracker::new());
            let options = DispatcherOptions {
                pool_size: NonZeroUsize::new(2).unwrap(),
                after_shutdown: policy,
            };
            let dispatcher = Dispatcher::new(
                runtime.handle().clone(),
                options,
                MockTransport::new(Duration::ZERO),
                tracker.clone(),
            );
            drop(runtime);

            let fired = Arc::new(AtomicUsize::new(0));
            let seen = fired.clone();
            let rejected = dispatcher
                .submit(TextRequest::new("http://service/", Method::Get, move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap_err();

            assert_eq!(fired.load(Ordering::SeqCst), 0, "{:?}", policy);
            assert_eq!(rejected.into_request().uri(), "http://service/");
            assert!(dispatcher.is_shutting_down());
            assert_eq!(dispatcher.stats(), DispatcherStats::default());
            assert!(tracker.snapshot().is_empty());

            // The queue stays closed, later calls take the same path.
            assert!(dispatcher
                .submit(TextRequest::new("http://service/again", Method::Get, |_, _| {}))
                .is_err());
        }
    }

    #[tokio::test]
    async fn test_aborted_worker_settles_bookkeeping() {
        let tracker = Arc::new(RequestTracker::new());
        let counters = Arc::new(Counters::default());
        let executor = Arc::new(Executor {
            transport: MockTransport::new(Duration::from_secs(60)),
            tracker: tracker.clone(),
            counters: counters.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        let id = RequestId::new();
        tracker.track_request(RequestInfo::new(id, Method::Get, "http://service/".to_string()));
        counters.submitted.fetch_add(1, Ordering::SeqCst);
        counters.pending.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        let job = Job {
            id,
            descriptor: RequestDescriptor::new("http://service/", Method::Get),
            slot: CallbackSlot::new(
                id,
                Box::new(move |status, body| {
                    let _ = tx.send((status, body));
                }),
            ),
        };
        let worker = tokio::spawn(async move { executor.run(job).await });

        let state_of = |id: RequestId| tracker.snapshot().into_iter().find(|info| info.id == id).map(|info| info.state);
        while state_of(id) != Some(RequestState::InFlight) {
            sleep(Duration::from_millis(1)).await;
        }
        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());

        assert_eq!(rx.await.unwrap(), (FAILURE_STATUS, String::new()));
        assert_eq!(counters.pending.load(Ordering::SeqCst), 0);
        assert_eq!(counters.failed.load(Ordering::SeqCst), 1);
        assert_eq!(state_of(id), Some(RequestState::Completed(Completion::Failure)));
    }
}
