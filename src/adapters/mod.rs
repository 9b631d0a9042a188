mod error_chain;
pub mod hyper_client;
pub mod reqwest_client;
pub mod tracking;

pub use hyper_client::HyperTransport;
pub use reqwest_client::ReqwestTransport;
pub use tracking::*;
