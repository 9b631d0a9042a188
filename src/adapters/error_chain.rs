use std::error::Error;
use std::io;

use crate::domain::TransportErrorKind;

/// Infer the failure category from an error and everything it wraps.
///
/// Client libraries bury the useful cause (resolver, socket, TLS backend)
/// several `source()` levels down, and often only as text.
pub(crate) fn classify(err: &(dyn Error + 'static)) -> Option<TransportErrorKind> {
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut => return Some(TransportErrorKind::Timeout),
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::AddrNotAvailable => return Some(TransportErrorKind::Connect),
                _ => {}
            }
        }

        let message = err.to_string().to_lowercase();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return Some(TransportErrorKind::Dns);
        }
        if message.contains("certificate") || message.contains("tls") || message.contains("ssl") {
            return Some(TransportErrorKind::Tls);
        }
        if message.contains("timed out") {
            return Some(TransportErrorKind::Timeout);
        }

        current = err.source();
    }

    None
}

/// Text of the error followed by each of its causes.
pub(crate) fn describe(err: &(dyn Error + 'static)) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
