use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use requestor::adapters::{HyperTransport, ReqwestTransport, RequestTracker};
use requestor::config::RequestorConfig;
use requestor::domain::{
    Dispatcher, Headers, Method, RequestDescriptor, ShutdownMode, TextRequest, FAILURE_STATUS,
};
use requestor::ports::TransportPort;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    /// reqwest client, HTTP and HTTPS
    Reqwest,
    /// hyper client, plain HTTP only
    Hyper,
}

#[derive(Parser, Debug)]
#[clap(version = env!("REQUESTOR_VERSION"), about = "Send HTTP requests through a bounded worker pool")]
pub struct Opts {
    /// Target URIs, dispatched concurrently
    #[clap(required = true)]
    uris: Vec<String>,

    /// HTTP method (GET, POST, PUT, DELETE or HEAD)
    #[clap(long, short = 'X', default_value = "GET")]
    method: Method,

    /// Extra request header as "Name: value", can be repeated
    #[clap(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Request body
    #[clap(long, short = 'd')]
    data: Option<String>,

    /// Number of workers, overrides the configuration file
    #[clap(long, short = 'w')]
    workers: Option<usize>,

    /// Configuration file (defaults to the per-user location)
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,

    /// HTTP client used to perform the requests
    #[clap(long, value_enum, default_value = "reqwest")]
    transport: TransportKind,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("Invalid header '{}', expected \"Name: value\"", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();

    let mut config = RequestorConfig::load(opts.config.as_deref())?;
    if let Some(workers) = opts.workers {
        config.workers = workers;
    }
    config.validate()?;

    let headers = opts
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Headers, _>>()?;

    if opts.data.is_some() && !opts.method.carries_body() {
        warn!("Sending a request body with {}", opts.method);
    }

    let transport: Arc<dyn TransportPort> = match opts.transport {
        TransportKind::Reqwest => Arc::new(ReqwestTransport::new(&config.transport)?),
        TransportKind::Hyper => Arc::new(HyperTransport::new(&config.transport)),
    };

    let tracker = Arc::new(RequestTracker::with_retention(config.tracking_retention()));
    let cleanup = tracker.start_cleanup();

    let dispatcher = Dispatcher::start(config.dispatcher_options()?, transport, tracker);
    info!(
        "Dispatching {} requests with {} workers",
        opts.uris.len(),
        config.workers
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    for uri in &opts.uris {
        let descriptor = match &opts.data {
            Some(data) => RequestDescriptor::with_body(uri.as_str(), opts.method, headers.clone(), data.clone()),
            None => RequestDescriptor::with_headers(uri.as_str(), opts.method, headers.clone()),
        };

        let tx = tx.clone();
        let uri = uri.clone();
        dispatcher.submit(TextRequest::from_descriptor(descriptor, move |status, body| {
            let _ = tx.send((uri, status, body));
        }))?;
    }
    drop(tx);

    let mut failures = 0;
    while let Some((uri, status, body)) = rx.recv().await {
        if status == FAILURE_STATUS {
            failures += 1;
            println!("{} -> request failed", uri);
        } else {
            println!("{} -> {}", uri, status);
        }
        if !body.is_empty() {
            println!("{}", body);
        }
    }

    dispatcher.shutdown(ShutdownMode::Drain).await;
    cleanup.abort();

    let stats = dispatcher.stats();
    info!(
        "{} requests: {} completed, {} failed",
        stats.submitted, stats.completed, stats.failed
    );

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
