pub mod tracking;
pub mod transport;

pub use tracking::TrackingPort;
pub use transport::TransportPort;
