use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, USER_AGENT};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;

use crate::adapters::error_chain::{classify, describe};
use crate::adapters::reqwest_client::parse_uri;
use crate::config::TransportConfig;
use crate::domain::{
    Method, RequestDescriptor, TextResponse, TransportError, TransportErrorKind, TransportResult,
};
use crate::ports::TransportPort;

type Body = Full<Bytes>;

/// Plain-HTTP transport on the hyper legacy client.
///
/// No TLS connector is wired in: `https` targets fail with a TLS error.
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
    user_agent: Option<HeaderValue>,
}

impl HyperTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));

        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .build(connector);

        Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            user_agent: HeaderValue::from_str(&config.user_agent).ok(),
        }
    }

    fn build_hyper_request(&self, request: &RequestDescriptor) -> TransportResult<Request<Body>> {
        let url = parse_uri(request.uri())?;
        if url.scheme() == "https" {
            return Err(TransportError::tls(format!(
                "No TLS support in the plain HTTP transport for {}",
                request.uri()
            )));
        }

        let uri: hyper::Uri = url
            .as_str()
            .parse()
            .map_err(|e| TransportError::protocol(format!("Invalid URI '{}': {}", request.uri(), e)))?;

        let mut builder = Request::builder().method(convert_method(request.method())).uri(uri);

        for (key, value) in request.headers().iter() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::protocol(format!("Invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::protocol(format!("Invalid value for header '{}': {}", key, e)))?;
            builder = builder.header(name, value);
        }

        if request.headers().get_all(USER_AGENT.as_str()).next().is_none() {
            if let Some(user_agent) = &self.user_agent {
                builder = builder.header(USER_AGENT, user_agent.clone());
            }
        }

        let body = match request.body() {
            Some(body) => Full::new(body.clone()),
            None => Full::new(Bytes::new()),
        };

        builder
            .body(body)
            .map_err(|e| TransportError::protocol(format!("{}", e)))
    }

    async fn exchange(&self, hyper_req: Request<Body>) -> TransportResult<TextResponse> {
        let hyper_resp = self.client.request(hyper_req).await.map_err(map_error)?;

        let status = hyper_resp.status().as_u16();
        let body_bytes = hyper_resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::protocol(format!("Failed to read response body: {}", describe(&e))))?
            .to_bytes();

        Ok(TextResponse::new(status, String::from_utf8_lossy(&body_bytes).into_owned()))
    }
}

#[async_trait]
impl TransportPort for HyperTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TextResponse> {
        let hyper_req = self.build_hyper_request(request)?;

        match timeout(self.request_timeout, self.exchange(hyper_req)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "No response from {} within {:?}",
                request.uri(),
                self.request_timeout
            ))),
        }
    }
}

fn convert_method(method: Method) -> hyper::Method {
    match method {
        Method::Get => hyper::Method::GET,
        Method::Post => hyper::Method::POST,
        Method::Put => hyper::Method::PUT,
        Method::Delete => hyper::Method::DELETE,
        Method::Head => hyper::Method::HEAD,
    }
}

fn map_error(err: hyper_util::client::legacy::Error) -> TransportError {
    let kind = match classify(&err) {
        Some(kind) => kind,
        None if err.is_connect() => TransportErrorKind::Connect,
        None => TransportErrorKind::Protocol,
    };

    TransportError::new(kind, describe(&err))
}
