//! The assembled server surface and its connection loop.
//!
//! # Dispatch
//!
//! Every request runs the middleware chain first. If no policy answers it,
//! the route table picks the group with the longest matching prefix. What no
//! group resolves falls to the built-in root handler (`GET /`), then to
//! `404`/`405`.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops `listener.accept()`; no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http::header::{ALLOW, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::assembler::Phase;
use crate::error::Error;
use crate::method::Method;
use crate::middleware::{Flow, MiddlewareChain};
use crate::request::Request;
use crate::response::{Response, detail};
use crate::router::{Resolved, RouteTable};

/// Payload of the built-in `GET /` handler.
pub const WELCOME_MESSAGE: &str = "Welcome to Games Repository API";

/// The immutable dispatch table produced by
/// [`Assembler::build_server`](crate::Assembler::build_server).
pub struct Server {
    chain: MiddlewareChain,
    table: RouteTable,
}

impl Server {
    pub(crate) fn new(chain: MiddlewareChain, table: RouteTable) -> Self {
        Self { chain, table }
    }

    /// Always [`Phase::Ready`]: `build_server` consumes the assembler, so
    /// holding a `Server` is what being ready means.
    pub fn phase(&self) -> Phase {
        Phase::Ready
    }

    /// Mounted `(prefix, tag)` pairs, most specific prefix first.
    pub fn mounts(&self) -> Vec<(&str, &str)> {
        self.table.mounts().collect()
    }

    /// Routes one request and produces one response. Read-only over the
    /// table, so any number of calls may run concurrently.
    pub async fn dispatch(&self, req: Request) -> Response {
        match self.chain.apply(req) {
            Flow::Respond { head, response, stopped_at } => {
                self.chain.finish(&head, response, stopped_at)
            }
            Flow::Continue(req) => {
                let head = req.head.clone();
                let response = self.route(req).await;
                self.chain.finish(&head, response, self.chain.len())
            }
        }
    }

    async fn route(&self, mut req: Request) -> Response {
        let Some(method) = req.routable_method() else {
            debug!(method = %req.method(), path = req.path(), "unroutable method");
            return fallback(None, req.path(), self.table.allowed(req.path()));
        };

        let allowed = match self.table.resolve(method, req.path()) {
            Resolved::Handler { handler, params, tag } => {
                debug!(group = tag, %method, path = req.path(), "dispatch");
                req.params = params;
                return handler.call(req).await;
            }
            Resolved::MethodNotAllowed(allowed) => allowed,
            Resolved::NotFound => Vec::new(),
        };
        fallback(Some(method), req.path(), allowed)
    }

    /// Starts accepting connections on `listener`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;

        // Shared read-only by every connection task.
        let server = Arc::new(self);

        info!(%addr, "listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even with connections queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let server = Arc::clone(&server);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { handle(server, req, peer).await }
                        });

                        // HTTP/1.1 or HTTP/2, whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the set does not grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("stopped");
        Ok(())
    }
}

/// Buffers the body and converts a hyper request before dispatch. Failures
/// become responses; hyper never sees an error.
async fn handle(
    server: Arc<Server>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(%peer, "failed to read request body: {e}");
            return Ok(detail(StatusCode::BAD_REQUEST, "Invalid request body").into_inner());
        }
    };

    let req = Request::from_http(http::Request::from_parts(parts, body));
    Ok(server.dispatch(req).await.into_inner())
}

/// Built-in root handler, then `404`/`405` for everything unresolved.
/// `method` is `None` for methods no group can register.
fn fallback(method: Option<Method>, path: &str, mut allowed: Vec<Method>) -> Response {
    if path == "/" {
        if matches!(method, Some(Method::Get | Method::Head)) {
            return welcome();
        }
        allowed.extend([Method::Get, Method::Head]);
        allowed.sort();
        allowed.dedup();
    }

    if allowed.is_empty() {
        return detail(StatusCode::NOT_FOUND, "Not Found");
    }

    let mut res = detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        res.set_header(ALLOW, value);
    }
    res
}

fn welcome() -> Response {
    Response::json_value(&serde_json::json!({ "message": WELCOME_MESSAGE }))
}

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
