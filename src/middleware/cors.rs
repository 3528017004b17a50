//! Cross-origin resource sharing.
//!
//! Preflights (`OPTIONS` with an `Origin` header) are answered here and never
//! reach a route group. Other requests from an allowed origin get their
//! response annotated after the group has produced it. Origins outside the
//! allow-list receive no CORS headers at all; the browser blocks the
//! response client-side.

use http::StatusCode;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, COOKIE, HeaderValue, ORIGIN,
    VARY,
};
use serde::{Deserialize, Serialize};

use super::Middleware;
use crate::error::ConfigError;
use crate::method::Method;
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// Headers browsers send without asking; always allowed on preflight.
const SAFELISTED_HEADERS: [&str; 4] = ["Accept", "Accept-Language", "Content-Language", "Content-Type"];

/// A set of allowed values, or `Any` when the configured list holds `"*"`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum AllowList {
    Any,
    Only(Vec<String>),
}

impl AllowList {
    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from(values.into_iter().map(Into::into).collect::<Vec<String>>())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    fn allows(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(values) => values.iter().any(|v| v == value),
        }
    }
}

impl From<Vec<String>> for AllowList {
    fn from(values: Vec<String>) -> Self {
        if values.iter().any(|v| v == "*") { Self::Any } else { Self::Only(values) }
    }
}

impl From<AllowList> for Vec<String> {
    fn from(list: AllowList) -> Self {
        match list {
            AllowList::Any => vec!["*".to_owned()],
            AllowList::Only(values) => values,
        }
    }
}

/// CORS options, as read from the `[cors]` config table.
///
/// The default admits the two local development origins with credentials,
/// any method and any header.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: AllowList,
    pub allow_credentials: bool,
    pub allowed_methods: AllowList,
    pub allowed_headers: AllowList,
    pub expose_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowList::only(["http://localhost:8000", "http://127.0.0.1:8000"]),
            allow_credentials: true,
            allowed_methods: AllowList::Any,
            allowed_headers: AllowList::Any,
            expose_headers: Vec::new(),
            max_age_secs: 600,
        }
    }
}

impl CorsConfig {
    /// Rejects credentialed access from any origin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_credentials && self.allowed_origins.is_any() {
            return Err(ConfigError::InsecureCorsPolicy);
        }
        Ok(())
    }
}

/// The CORS policy, with header values rendered once at registration.
pub struct Cors {
    config: CorsConfig,
    // Lowercased, for comparison against Access-Control-Request-Headers.
    allowed_headers_lower: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let methods: Vec<&str> = match &config.allowed_methods {
            AllowList::Any => Method::ALL.iter().map(|m| m.as_str()).collect(),
            AllowList::Only(list) => list.iter().map(String::as_str).collect(),
        };

        let (allow_headers, allowed_headers_lower) = match &config.allowed_headers {
            AllowList::Any => (None, Vec::new()),
            AllowList::Only(list) => {
                let mut names: Vec<&str> = SAFELISTED_HEADERS.to_vec();
                names.extend(list.iter().map(String::as_str));
                names.sort_unstable();
                names.dedup();
                let lower: Vec<String> = names.iter().map(|h| h.to_ascii_lowercase()).collect();
                (Some(header_value(&names.join(", "))?), lower)
            }
        };

        let expose_headers = if config.expose_headers.is_empty() {
            None
        } else {
            Some(header_value(&config.expose_headers.join(", "))?)
        };

        Ok(Self {
            allow_methods: header_value(&methods.join(", "))?,
            allow_headers,
            allowed_headers_lower,
            expose_headers,
            max_age: HeaderValue::from(config.max_age_secs),
            config,
        })
    }

    fn allows_origin(&self, origin: &str) -> bool {
        self.config.allowed_origins.allows(origin)
    }

    /// Answer a preflight. Any failure yields `400` with no CORS headers.
    fn preflight(&self, head: &RequestHead, origin: &str) -> Response {
        let mut failures = Vec::new();
        let mut res = Response::text("OK");

        if self.allows_origin(origin) {
            self.set_allow_origin(&mut res, origin, head);
        } else {
            failures.push("origin");
        }

        if let Some(requested) = head.header(ACCESS_CONTROL_REQUEST_METHOD.as_str()) {
            if !self.config.allowed_methods.allows(requested) {
                failures.push("method");
            }
        }

        match (head.header(ACCESS_CONTROL_REQUEST_HEADERS.as_str()), &self.allow_headers) {
            (Some(requested), None) => {
                // Any header allowed: echo what was asked for.
                if let Ok(value) = HeaderValue::from_str(requested) {
                    res.set_header(ACCESS_CONTROL_ALLOW_HEADERS, value);
                }
            }
            (requested, Some(allowed)) => {
                let rejected = requested.into_iter().flat_map(|r| r.split(',')).any(|h| {
                    let h = h.trim().to_ascii_lowercase();
                    !h.is_empty() && !self.allowed_headers_lower.contains(&h)
                });
                if rejected {
                    failures.push("headers");
                }
                res.set_header(ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
            }
            (None, None) => {}
        }

        if !failures.is_empty() {
            tracing::debug!(origin, path = head.path(), ?failures, "CORS preflight rejected");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .text(format!("Disallowed CORS {}", failures.join(", ")));
        }

        res.set_header(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        res.set_header(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        res
    }

    /// Origin echo (or `*`), credentials and `Vary`.
    fn set_allow_origin(&self, res: &mut Response, origin: &str, head: &RequestHead) {
        let wildcard = self.config.allowed_origins.is_any()
            && !self.config.allow_credentials
            && head.header(COOKIE.as_str()).is_none();

        if wildcard {
            res.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else if let Ok(value) = HeaderValue::from_str(origin) {
            res.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            add_vary_origin(res);
        }

        if self.config.allow_credentials {
            res.set_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }
}

impl Middleware for Cors {
    fn name(&self) -> &'static str { "cors" }

    fn on_request(&self, req: &mut Request) -> Option<Response> {
        if *req.method() != http::Method::OPTIONS {
            return None;
        }
        let origin = req.header(ORIGIN.as_str())?;
        Some(self.preflight(req.head(), origin))
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let Some(origin) = head.header(ORIGIN.as_str()) else { return };
        if !self.allows_origin(origin) {
            return;
        }
        self.set_allow_origin(res, origin, head);
        if let Some(expose) = &self.expose_headers {
            res.set_header(ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(value.to_owned()))
}

/// Adds `Origin` to `Vary` without clobbering what the handler set.
fn add_vary_origin(res: &mut Response) {
    let merged = match res.header(VARY.as_str()) {
        None => HeaderValue::from_static("Origin"),
        Some(existing) if existing.split(',').any(|v| v.trim().eq_ignore_ascii_case("origin")) => {
            return;
        }
        Some(existing) => match HeaderValue::from_str(&format!("{existing}, Origin")) {
            Ok(v) => v,
            Err(_) => return,
        },
    };
    res.set_header(VARY, merged);
}
