use std::fmt;

use super::TextRequest;

/// Category of a failed transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Protocol,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Protocol => "protocol",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a transport adapter. Never crosses the `submit`
/// boundary; workers turn it into a failure-status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn dns(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Dns, detail)
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, detail)
    }

    pub fn tls(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Tls, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, detail)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Dns => write!(f, "DNS resolution failed: {}", self.detail),
            TransportErrorKind::Connect => write!(f, "Connection failed: {}", self.detail),
            TransportErrorKind::Tls => write!(f, "TLS failure: {}", self.detail),
            TransportErrorKind::Timeout => write!(f, "Operation timed out: {}", self.detail),
            TransportErrorKind::Protocol => write!(f, "Protocol error: {}", self.detail),
        }
    }
}

impl std::error::Error for TransportError {}

/// Synchronous rejection of a `submit` call.
///
/// The request is handed back untouched; its callback has not been invoked.
pub enum SubmitError {
    AlreadyShuttingDown(TextRequest),
}

impl SubmitError {
    pub fn into_request(self) -> TextRequest {
        match self {
            SubmitError::AlreadyShuttingDown(request) => request,
        }
    }
}

impl fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::AlreadyShuttingDown(request) => f
                .debug_tuple("AlreadyShuttingDown")
                .field(request)
                .finish(),
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::AlreadyShuttingDown(request) => write!(
                f,
                "Dispatcher is already shutting down, rejected {} {}",
                request.method(),
                request.uri()
            ),
        }
    }
}

impl std::error::Error for SubmitError {}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
