use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::error_chain::{classify, describe};
use crate::config::TransportConfig;
use crate::domain::{
    Headers, Method, RequestDescriptor, TextResponse, TransportError, TransportErrorKind, TransportResult,
};
use crate::ports::TransportPort;

/// Transport backed by a shared `reqwest::Client` (HTTP and HTTPS).
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                let kind = classify(&e).unwrap_or(TransportErrorKind::Tls);
                TransportError::new(kind, format!("Failed to build HTTP client: {}", describe(&e)))
            })?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransportPort for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TextResponse> {
        let url = parse_uri(request.uri())?;

        let mut builder = self
            .client
            .request(convert_method(request.method()), url)
            .headers(build_headers(request.headers())?);

        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;

        Ok(TextResponse::new(status, body))
    }
}

pub(crate) fn parse_uri(uri: &str) -> TransportResult<Url> {
    let url = Url::parse(uri).map_err(|e| TransportError::protocol(format!("Invalid URI '{}': {}", uri, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransportError::protocol(format!("Unsupported scheme '{}' in '{}'", other, uri))),
    }
}

fn convert_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

/// Duplicate names are appended, never overwritten.
fn build_headers(headers: &Headers) -> TransportResult<reqwest::header::HeaderMap> {
    let mut header_map = reqwest::header::HeaderMap::with_capacity(headers.len());

    for (key, value) in headers.iter() {
        let name = key
            .parse::<reqwest::header::HeaderName>()
            .map_err(|e| TransportError::protocol(format!("Invalid header name '{}': {}", key, e)))?;
        let value = value
            .parse::<reqwest::header::HeaderValue>()
            .map_err(|e| TransportError::protocol(format!("Invalid value for header '{}': {}", key, e)))?;
        header_map.append(name, value);
    }

    Ok(header_map)
}

fn map_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_builder() {
        TransportErrorKind::Protocol
    } else if let Some(kind) = classify(&err) {
        kind
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Protocol
    };

    TransportError::new(kind, describe(&err))
}
