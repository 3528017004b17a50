//! Per-request log line with method, path, status and latency.

use std::time::Instant;

use super::Middleware;
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// Logs every request once its response is ready.
///
/// Register it first to see everything, including preflights answered by
/// CORS; register it later and it only sees what earlier policies let
/// through.
pub struct Trace;

#[derive(Clone, Copy)]
struct Started(Instant);

impl Middleware for Trace {
    fn name(&self) -> &'static str { "trace" }

    fn on_request(&self, req: &mut Request) -> Option<Response> {
        req.extensions_mut().insert(Started(Instant::now()));
        None
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let latency_ms = head
            .extensions()
            .get::<Started>()
            .map(|s| s.0.elapsed().as_secs_f64() * 1000.0);
        let status = res.status_code().as_u16();

        if res.status_code().is_server_error() {
            tracing::warn!(method = %head.method(), path = head.path(), status, ?latency_ms, "request failed");
        } else {
            tracing::info!(method = %head.method(), path = head.path(), status, ?latency_ms, "request");
        }
    }
}
