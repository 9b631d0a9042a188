#![cfg(test)]
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mock_server;

pub use mock_server::{MockHttpServer, ServerState};

use std::sync::Arc;

use requestor::adapters::{HyperTransport, ReqwestTransport, RequestTracker};
use requestor::config::TransportConfig;
use requestor::domain::{Dispatcher, DispatcherOptions, SubmitPolicy};
use requestor::ports::TransportPort;

pub fn transport_config() -> TransportConfig {
    TransportConfig {
        request_timeout_secs: 5,
        connect_timeout_secs: 2,
        ..TransportConfig::default()
    }
}

/// Gives up on a response after one second.
pub fn impatient_transport_config() -> TransportConfig {
    TransportConfig {
        request_timeout_secs: 1,
        ..transport_config()
    }
}

pub fn reqwest_transport() -> Arc<dyn TransportPort> {
    Arc::new(ReqwestTransport::new(&transport_config()).expect("Failed to build reqwest transport"))
}

pub fn hyper_transport() -> Arc<dyn TransportPort> {
    Arc::new(HyperTransport::new(&transport_config()))
}

pub fn start_dispatcher(transport: Arc<dyn TransportPort>, workers: usize) -> Dispatcher {
    let options = DispatcherOptions {
        pool_size: std::num::NonZeroUsize::new(workers).expect("workers must be non-zero"),
        after_shutdown: SubmitPolicy::Reject,
    };
    Dispatcher::start(options, transport, Arc::new(RequestTracker::new()))
}
