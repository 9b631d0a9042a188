mod transport;

pub use transport::HyperTransport;
