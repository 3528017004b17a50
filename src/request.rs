//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::Extensions;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::method::Method;

/// Method, path and headers of a request.
///
/// Middleware sees the head again on the way out, after the body has been
/// handed to the route group.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub(crate) method: http::Method,
    pub(crate) path: String,
    pub(crate) raw_path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) extensions: Extensions,
}

impl RequestHead {
    /// The method as sent on the wire, routable or not.
    pub fn method(&self) -> &http::Method { &self.method }

    /// The method if route groups can handle it.
    pub fn routable_method(&self) -> Option<Method> {
        Method::try_from(&self.method).ok()
    }

    /// Percent-decoded path, as matched against route groups.
    pub fn path(&self) -> &str { &self.path }

    /// The path exactly as received.
    pub fn raw_path(&self) -> &str { &self.raw_path }

    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Typed values attached by middleware on the way in.
    pub fn extensions(&self) -> &Extensions { &self.extensions }

    /// Header value as text. Case-insensitive; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An incoming HTTP request with its body fully buffered.
#[derive(Debug)]
pub struct Request {
    pub(crate) head: RequestHead,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    /// Starts a request by hand. Used by tests and in-process callers of
    /// [`Server::dispatch`](crate::Server::dispatch).
    pub fn builder(method: Method, uri: &str) -> RequestBuilder {
        let (raw_path, query) = split_uri(uri);
        RequestBuilder {
            head: RequestHead {
                method: method.into(),
                path: decode_path(&raw_path),
                raw_path,
                query,
                headers: HeaderMap::new(),
                extensions: Extensions::new(),
            },
            body: Bytes::new(),
        }
    }

    /// Converts a buffered `http::Request`. Any method is accepted; the
    /// route table answers unroutable ones with `405`.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let raw_path = parts.uri.path().to_owned();
        Self {
            head: RequestHead {
                method: parts.method,
                path: decode_path(&raw_path),
                raw_path,
                query: parts.uri.query().map(str::to_owned),
                headers: parts.headers,
                extensions: parts.extensions,
            },
            body,
            params: HashMap::new(),
        }
    }

    pub fn method(&self) -> &http::Method { &self.head.method }
    pub fn routable_method(&self) -> Option<Method> { self.head.routable_method() }
    pub fn path(&self) -> &str { &self.head.path }
    pub fn query(&self) -> Option<&str> { self.head.query() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn head(&self) -> &RequestHead { &self.head }
    pub fn body(&self) -> &[u8] { &self.body }

    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.head.extensions }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/{id}` in a group mounted at `/games`,
    /// `req.param("id")` on `/games/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Fluent builder for [`Request`]. Obtain via [`Request::builder`].
pub struct RequestBuilder {
    head: RequestHead,
    body: Bytes,
}

impl RequestBuilder {
    /// Adds a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::try_from(name), HeaderValue::try_from(value))
        {
            self.head.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        Request { head: self.head, body: self.body, params: HashMap::new() }
    }
}

/// Percent-decodes a path. Invalid UTF-8 is replaced, never rejected.
fn decode_path(raw: &str) -> String {
    if !raw.contains('%') {
        return raw.to_owned();
    }
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

fn split_uri(uri: &str) -> (String, Option<String>) {
    match uri.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (uri.to_owned(), None),
    }
}
