use crate::domain::{Completion, RequestId, RequestInfo};

/// Port for following requests through `Queued -> InFlight -> Completed`.
///
/// Methods are synchronous because `track_request` is called from
/// `Dispatcher::submit`, which must not await.
pub trait TrackingPort: Send + Sync {
    /// Register a freshly queued request
    fn track_request(&self, info: RequestInfo);

    /// A worker picked the request up
    fn mark_in_flight(&self, id: RequestId);

    /// The request reached its terminal state
    fn mark_completed(&self, id: RequestId, completion: Completion);

    /// Drop a request that never made it onto the queue
    fn forget(&self, id: RequestId);

    /// Every request currently known, oldest first
    fn snapshot(&self) -> Vec<RequestInfo>;
}
