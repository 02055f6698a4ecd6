//! Request logging with a noise filter
//!
//! One line per request:
//! `<client> "<METHOD> <path> <version>" <status> <elapsed>`.
//! Lines containing any configured filter substring are dropped, which
//! keeps health probes out of the log.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

/// Settings for [`request_logging`]
#[derive(Debug, Clone)]
pub struct RequestLog {
    filter: Arc<[String]>,
    behind_proxy: bool,
}

impl RequestLog {
    pub fn new(filter: &[String], behind_proxy: bool) -> Self {
        Self {
            filter: filter.iter().filter(|f| !f.is_empty()).cloned().collect(),
            behind_proxy,
        }
    }

    /// True when `line` matches a filter substring
    pub fn suppressed(&self, line: &str) -> bool {
        self.filter.iter().any(|f| line.contains(f.as_str()))
    }

    fn client_address(&self, request: &Request) -> String {
        if self.behind_proxy {
            if let Some(client) = forwarded_client(request.headers()) {
                return client;
            }
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Client address set by a reverse proxy
fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-real-ip")
        .or_else(|| header("x-forwarded-for").and_then(|v| v.split(',').next()).map(str::trim))
        .map(str::to_string)
}

/// Middleware logging every request after it completes
pub async fn request_logging(State(log): State<RequestLog>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let client = log.client_address(&request);
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let version = request.version();

    let response = next.run(request).await;

    let line = format!(
        "{} \"{} {} {:?}\" {} {:?}",
        client,
        method,
        path,
        version,
        response.status().as_u16(),
        start.elapsed()
    );
    if !log.suppressed(&line) {
        tracing::info!("{}", line);
    }
    response
}
