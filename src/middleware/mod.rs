//! Middleware layer.
//!
//! Middleware intercepts requests before they reach a route group and
//! responses on the way back out. It is the place for cross-cutting
//! concerns: CORS, structured tracing, header inspection.
//!
//! Policies run in the order they were registered, for every request,
//! regardless of which group ends up handling it. A policy may answer a
//! request itself (a CORS preflight, say). Policies registered after it then
//! never see that request, and only the policies before it run their
//! response hook.
//!
//! Built-in policies:
//! - [`cors`]: cross-origin resource sharing
//! - [`trace`]: one log event per request with method, path, status, latency

pub mod cors;
pub mod trace;

use std::sync::Arc;

use crate::error::ConfigError;
use crate::request::{Request, RequestHead};
use crate::response::Response;

pub use cors::{AllowList, Cors, CorsConfig};
pub use trace::Trace;

/// A cross-cutting request/response policy.
///
/// Both hooks default to pass-through, so a policy implements only the side
/// it cares about.
pub trait Middleware: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or annotate the request. Returning a response stops the chain
    /// and skips routing entirely.
    fn on_request(&self, _req: &mut Request) -> Option<Response> {
        None
    }

    /// Annotate the outgoing response.
    fn on_response(&self, _head: &RequestHead, _res: &mut Response) {}
}

/// A policy as handed to [`MiddlewareChain::register`].
pub enum Policy {
    Cors(CorsConfig),
    Trace,
    Custom(Arc<dyn Middleware>),
}

impl Policy {
    /// Validates the policy's configuration and builds its middleware.
    fn build(self) -> Result<Arc<dyn Middleware>, ConfigError> {
        Ok(match self {
            Self::Cors(config) => Arc::new(Cors::new(config)?),
            Self::Trace => Arc::new(Trace),
            Self::Custom(m) => m,
        })
    }
}

/// What the chain decided about a request.
pub enum Flow {
    /// Route the request. Run [`MiddlewareChain::finish`] over every policy
    /// afterwards.
    Continue(Request),
    /// Policy `stopped_at` answered the request itself.
    Respond {
        head: RequestHead,
        response: Response,
        stopped_at: usize,
    },
}

/// Ordered list of policies applied to every inbound request.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    policies: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a policy. Invalid configuration fails here, never on the
    /// first request; on failure the chain is left unchanged.
    pub fn register(&mut self, policy: Policy) -> Result<(), ConfigError> {
        let middleware = policy.build()?;
        tracing::debug!(policy = middleware.name(), position = self.policies.len(), "middleware registered");
        self.policies.push(middleware);
        Ok(())
    }

    pub fn len(&self) -> usize { self.policies.len() }
    pub fn is_empty(&self) -> bool { self.policies.is_empty() }

    /// Policy names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Runs every request hook in registration order.
    pub fn apply(&self, mut req: Request) -> Flow {
        for (i, policy) in self.policies.iter().enumerate() {
            if let Some(response) = policy.on_request(&mut req) {
                return Flow::Respond { head: req.head, response, stopped_at: i };
            }
        }
        Flow::Continue(req)
    }

    /// Runs the response hooks of the first `upto` policies, in registration
    /// order.
    pub fn finish(&self, head: &RequestHead, mut res: Response, upto: usize) -> Response {
        for policy in self.policies.iter().take(upto) {
            policy.on_response(head, &mut res);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::method::Method;

    /// Records every hook invocation into a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        answer: bool,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str { self.name }

        fn on_request(&self, _req: &mut Request) -> Option<Response> {
            self.log.lock().unwrap().push(format!("{}:req", self.name));
            self.answer.then(|| Response::status(StatusCode::FORBIDDEN))
        }

        fn on_response(&self, _head: &RequestHead, _res: &mut Response) {
            self.log.lock().unwrap().push(format!("{}:res", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, answer: bool) -> Policy {
        Policy::Custom(Arc::new(Recorder { name, log: Arc::clone(log), answer }))
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.register(recorder("a", &log, false)).unwrap();
        chain.register(recorder("b", &log, false)).unwrap();

        let req = Request::builder(Method::Get, "/games").build();
        let Flow::Continue(req) = chain.apply(req) else { panic!("unexpected short-circuit") };
        chain.finish(req.head(), Response::text("ok"), chain.len());

        assert_eq!(*log.lock().unwrap(), vec!["a:req", "b:req", "a:res", "b:res"]);
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[test]
    fn short_circuit_hides_request_from_later_policies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.register(recorder("log", &log, false)).unwrap();
        chain.register(recorder("deny", &log, true)).unwrap();
        chain.register(recorder("late", &log, false)).unwrap();

        let req = Request::builder(Method::Get, "/users/me").build();
        let Flow::Respond { head, response, stopped_at } = chain.apply(req) else {
            panic!("expected short-circuit");
        };
        assert_eq!(stopped_at, 1);
        let res = chain.finish(&head, response, stopped_at);

        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(*log.lock().unwrap(), vec!["log:req", "deny:req", "log:res"]);
    }

    #[test]
    fn rejected_policy_leaves_chain_untouched() {
        let mut chain = MiddlewareChain::new();
        let insecure = CorsConfig {
            allowed_origins: AllowList::Any,
            allow_credentials: true,
            ..CorsConfig::default()
        };

        let err = chain.register(Policy::Cors(insecure)).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureCorsPolicy));
        assert!(chain.is_empty());
    }
}
