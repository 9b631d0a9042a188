//! Asynchronous HTTP request dispatch.
//!
//! Callers describe a request with a [`domain::RequestDescriptor`], bind a
//! completion callback to it and hand it to a [`domain::Dispatcher`]. A
//! bounded pool of workers performs the call through a
//! [`ports::TransportPort`] and invokes the callback exactly once with the
//! status code and response text.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
