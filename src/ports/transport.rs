use crate::domain::{RequestDescriptor, TextResponse, TransportResult};
use async_trait::async_trait;

/// Port for performing the actual HTTP call.
///
/// Any HTTP response, whatever its status, is a successful call. Only a
/// failure to obtain a response (DNS, connect, TLS, timeout, malformed
/// request) is reported as an error. Retry policies belong in a wrapper
/// implementing this trait around another transport.
#[async_trait]
pub trait TransportPort: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TextResponse>;
}
