use crate::domain::{Completion, RequestId, RequestInfo, RequestState};
use crate::ports::TrackingPort;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, warn};

/// How long completed requests stay in snapshots by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(4);

const PRUNE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Registry {
    next_sequence: u64,
    last_pruned: Option<Instant>,
    requests: HashMap<RequestId, (u64, RequestInfo)>,
}

impl Registry {
    /// Remove requests that completed more than `retention` ago.
    fn prune(&mut self, retention: Duration, now: Instant) {
        self.last_pruned = Some(now);
        self.requests.retain(|_, (_, info)| match info.finished_at {
            Some(finished_at) => now.saturating_duration_since(finished_at) < retention,
            None => true,
        });
    }

    fn prune_due(&self, now: Instant) -> bool {
        self.last_pruned
            .map_or(true, |at| now.saturating_duration_since(at) >= PRUNE_INTERVAL)
    }
}

/// In-memory request tracker
///
/// Completed requests are dropped once older than the retention window. This
/// happens as new requests come in, and in the background too when
/// [`RequestTracker::start_cleanup`] runs.
pub struct RequestTracker {
    registry: Arc<RwLock<Registry>>,
    retention: Duration,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            retention,
        }
    }

    /// Start background cleanup task, so completed requests also expire
    /// while nothing new is submitted
    pub fn start_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let retention = self.retention;

        tokio::spawn(async move {
            let mut ticker = interval(PRUNE_INTERVAL);

            loop {
                ticker.tick().await;
                registry
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .prune(retention, Instant::now());
            }
        })
    }

    fn transition(&self, id: RequestId, next: RequestState) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        let info = match registry.requests.get_mut(&id) {
            Some((_, info)) => info,
            None => {
                warn!("Request {} is not tracked, ignoring transition to {}", id, next);
                return;
            }
        };

        if !info.state.can_transition_to(next) {
            warn!("Request {} cannot move from {} to {}", id, info.state, next);
            return;
        }

        let now = Instant::now();
        match next {
            RequestState::InFlight => info.started_at = Some(now),
            RequestState::Completed(_) => info.finished_at = Some(now),
            RequestState::Queued => {}
        }
        debug!("{} {} {}", info.method, info.uri, next);
        info.state = next;
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingPort for RequestTracker {
    fn track_request(&self, info: RequestInfo) {
        debug!("{} {} queued", info.method, info.uri);

        let now = Instant::now();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.prune_due(now) {
            registry.prune(self.retention, now);
        }
        let sequence = registry.next_sequence;
        registry.next_sequence += 1;
        registry.requests.insert(info.id, (sequence, info));
    }

    fn mark_in_flight(&self, id: RequestId) {
        self.transition(id, RequestState::InFlight);
    }

    fn mark_completed(&self, id: RequestId, completion: Completion) {
        self.transition(id, RequestState::Completed(completion));
    }

    fn forget(&self, id: RequestId) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.requests.remove(&id).is_some() {
            debug!("Request {} forgotten", id);
        }
    }

    fn snapshot(&self) -> Vec<RequestInfo> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<&(u64, RequestInfo)> = registry.requests.values().collect();
        entries.sort_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, info)| info.clone()).collect()
    }
}
