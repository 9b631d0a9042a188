#![cfg(test)]
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the server has seen so far.
#[derive(Default)]
pub struct ServerState {
    pub hits: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub bodies: Mutex<Vec<Vec<u8>>>,
}

/// Local HTTP server with a handful of fixed routes:
///
/// - `/ok`: `200 ok`
/// - `/echo`: `200` with the request body
/// - `/headers`: `200` with every `x-*` request header, one `name: value` per line
/// - `/slow`: `200 slow` after 50ms
/// - `/stall`: `200 stall` after 3s
/// - `/status/418`: `418 teapot`
/// - anything else: `404 not found`
pub struct MockHttpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    _server_handle: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());
        let shared = state.clone();

        let server_handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let io = TokioIo::new(stream);
                        let state = shared.clone();

                        tokio::spawn(async move {
                            let service_fn = service_fn(move |req| handle(req, state.clone()));

                            if let Err(_err) = ServerBuilder::new(TokioExecutor::new())
                                .serve_connection(io, service_fn)
                                .await
                            {
                                // Clients hanging up early is fine in tests
                            }
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            addr,
            state,
            _server_handle: server_handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

async fn handle(req: Request<Incoming>, state: Arc<ServerState>) -> Result<Response<Full<Bytes>>, Infallible> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let path = req.uri().path().to_string();
    let custom_headers: String = req
        .headers()
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-"))
        .map(|(name, value)| format!("{}: {}\n", name, value.to_str().unwrap_or("")))
        .collect();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    state.bodies.lock().unwrap().push(body.to_vec());

    let (status, text) = match path.as_str() {
        "/ok" => (StatusCode::OK, Bytes::from_static(b"ok")),
        "/echo" => (StatusCode::OK, body),
        "/headers" => (StatusCode::OK, Bytes::from(custom_headers)),
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            (StatusCode::OK, Bytes::from_static(b"slow"))
        }
        "/stall" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, Bytes::from_static(b"stall"))
        }
        "/status/418" => (StatusCode::IM_A_TEAPOT, Bytes::from_static(b"teapot")),
        _ => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
    };

    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    Ok(Response::builder()
        .status(status)
        .body(Full::new(text))
        .unwrap())
}
