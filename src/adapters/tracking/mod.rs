mod tracker;

pub use tracker::{RequestTracker, DEFAULT_RETENTION};
