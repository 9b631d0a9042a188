use bytes::Bytes;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tracing::{error, warn};

use super::{Headers, Method, RequestDescriptor, RequestId, FAILURE_STATUS};

/// Receives `(status, body)` once the request has finished.
///
/// On transport failure the status is [`FAILURE_STATUS`] and the body is empty.
pub type TextCallback = Box<dyn FnOnce(u16, String) + Send + 'static>;

/// A descriptor bound to the callback that will receive its outcome.
///
/// Move-only: the callback must run exactly once, so the pair cannot be
/// duplicated. Clone the [`RequestDescriptor`] instead when the same call has
/// to be issued again.
pub struct TextRequest {
    descriptor: RequestDescriptor,
    callback: TextCallback,
}

impl TextRequest {
    pub fn new<F>(uri: impl Into<String>, method: Method, callback: F) -> Self
    where
        F: FnOnce(u16, String) + Send + 'static,
    {
        Self::from_descriptor(RequestDescriptor::new(uri, method), callback)
    }

    pub fn with_headers<F>(uri: impl Into<String>, method: Method, headers: Headers, callback: F) -> Self
    where
        F: FnOnce(u16, String) + Send + 'static,
    {
        Self::from_descriptor(RequestDescriptor::with_headers(uri, method, headers), callback)
    }

    pub fn with_body<F>(
        uri: impl Into<String>,
        method: Method,
        headers: Headers,
        body: impl Into<Bytes>,
        callback: F,
    ) -> Self
    where
        F: FnOnce(u16, String) + Send + 'static,
    {
        Self::from_descriptor(RequestDescriptor::with_body(uri, method, headers, body), callback)
    }

    pub fn from_descriptor<F>(descriptor: RequestDescriptor, callback: F) -> Self
    where
        F: FnOnce(u16, String) + Send + 'static,
    {
        Self {
            descriptor,
            callback: Box::new(callback),
        }
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn uri(&self) -> &str {
        self.descriptor.uri()
    }

    pub fn method(&self) -> Method {
        self.descriptor.method()
    }

    pub fn headers(&self) -> &Headers {
        self.descriptor.headers()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.descriptor.body()
    }

    pub fn into_parts(self) -> (RequestDescriptor, TextCallback) {
        (self.descriptor, self.callback)
    }

    pub(crate) fn from_parts(descriptor: RequestDescriptor, callback: TextCallback) -> Self {
        Self { descriptor, callback }
    }
}

impl fmt::Debug for TextRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextRequest")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Dispatcher-side owner of a callback.
///
/// Guarantees the callback runs once: either through [`CallbackSlot::complete`]
/// or, if the slot is dropped first (worker torn down, queue dropped with the
/// runtime), with the failure status from `Drop`.
pub(crate) struct CallbackSlot {
    id: RequestId,
    callback: Option<TextCallback>,
}

impl CallbackSlot {
    pub(crate) fn new(id: RequestId, callback: TextCallback) -> Self {
        Self {
            id,
            callback: Some(callback),
        }
    }

    pub(crate) fn complete(mut self, status: u16, body: String) {
        if let Some(callback) = self.callback.take() {
            invoke(self.id, callback, status, body);
        }
    }

    /// Take the callback back without running it.
    pub(crate) fn into_callback(mut self) -> Option<TextCallback> {
        self.callback.take()
    }

    /// Report a failure from a task spawned on `handle`.
    ///
    /// If the runtime behind `handle` is gone the task is dropped inside
    /// `spawn`, and the slot is handed back untouched instead of completing on
    /// the calling thread.
    pub(crate) fn fail_on(self, handle: &Handle) -> Result<(), CallbackSlot> {
        let handoff = Arc::new(Mutex::new(Handoff {
            slot: Some(self),
            spawning: true,
            abandoned: false,
        }));
        let deferred = DeferredFailure {
            handoff: handoff.clone(),
        };

        handle.spawn(async move {
            if let Some(slot) = deferred.take(true) {
                slot.complete(FAILURE_STATUS, String::new());
            }
        });

        let mut handoff = handoff.lock().unwrap_or_else(PoisonError::into_inner);
        handoff.spawning = false;
        if handoff.abandoned {
            return handoff.slot.take().map_or(Ok(()), Err);
        }
        Ok(())
    }
}

struct Handoff {
    slot: Option<CallbackSlot>,
    spawning: bool,
    abandoned: bool,
}

/// Task side of [`CallbackSlot::fail_on`].
struct DeferredFailure {
    handoff: Arc<Mutex<Handoff>>,
}

impl DeferredFailure {
    fn take(&self, polled: bool) -> Option<CallbackSlot> {
        let mut handoff = self.handoff.lock().unwrap_or_else(PoisonError::into_inner);
        if !polled && handoff.spawning {
            handoff.abandoned = true;
            return None;
        }
        handoff.slot.take()
    }
}

impl Drop for DeferredFailure {
    fn drop(&mut self) {
        // Dropped unpolled after `spawn` returned: the runtime is shutting down.
        if let Some(slot) = self.take(false) {
            slot.complete(FAILURE_STATUS, String::new());
        }
    }
}

impl Drop for CallbackSlot {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("Request {} dropped before completion, reporting failure", self.id);
            invoke(self.id, callback, FAILURE_STATUS, String::new());
        }
    }
}

fn invoke(id: RequestId, callback: TextCallback, status: u16, body: String) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(status, body))).is_err() {
        error!("Completion callback for request {} panicked", id);
    }
}
