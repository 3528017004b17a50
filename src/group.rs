//! Route groups: a set of handlers owned by one collaborator, bound to a
//! URL prefix.
//!
//! Handlers are registered with paths relative to the prefix. A group built
//! as `RouteGroup::new("/games", "games").get("/{id}", get_game)` answers
//! `GET /games/42`. Paths are compiled into one radix tree per method when
//! the group is mounted, so malformed or conflicting routes fail at startup.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::error::MountError;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

struct Route {
    method: Method,
    path: String,
    handler: BoxedHandler,
}

/// A cohesive set of handlers mounted under one prefix.
///
/// The prefix is either empty (top-level routes such as `/auth/token`) or
/// starts with `/`. A trailing `/` is dropped, so `"/"` and `""` are the same
/// prefix.
pub struct RouteGroup {
    prefix: String,
    tag: String,
    routes: Vec<Route>,
}

impl RouteGroup {
    pub fn new(prefix: impl Into<String>, tag: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), tag: tag.into(), routes: Vec::new() }
    }

    /// Register a handler for a method + relative path. Returns `self` for
    /// chaining.
    ///
    /// Path parameters use `{name}` syntax; `{*name}` captures the rest of
    /// the path. An empty path is the group root, same as `"/"`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };
        self.routes.push(Route { method, path, handler: handler.into_boxed_handler() });
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, path, handler)
    }

    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn tag(&self) -> &str { &self.tag }

    /// Registered `(method, relative path)` pairs, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> {
        self.routes.iter().map(|r| (r.method, r.path.as_str()))
    }

    /// Validates the prefix and builds the per-method trees.
    pub(crate) fn compile(self) -> Result<MountedGroup, MountError> {
        let prefix = normalize_prefix(&self.prefix)?;
        let mut trees: HashMap<Method, MatchitRouter<BoxedHandler>> = HashMap::new();

        for route in self.routes {
            trees
                .entry(route.method)
                .or_default()
                .insert(route.path.as_str(), route.handler)
                .map_err(|source| MountError::InvalidRoute {
                    tag: self.tag.clone(),
                    path: route.path.clone(),
                    source,
                })?;
        }

        let group = MountedGroup { prefix, tag: self.tag, trees };
        if group.prefix.is_empty() && group.claims_root() {
            return Err(MountError::RootCollision { tag: group.tag });
        }
        Ok(group)
    }
}

/// Canonical form of a group prefix: empty, or `/`-led without a trailing `/`.
pub(crate) fn normalize_prefix(raw: &str) -> Result<String, MountError> {
    let invalid = |reason| MountError::InvalidPrefix { prefix: raw.to_owned(), reason };

    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        return Err(invalid("must be empty or start with `/`"));
    }
    if trimmed.contains("//") {
        return Err(invalid("must not contain empty segments"));
    }
    if trimmed.chars().any(|c| matches!(c, '{' | '}' | '*' | '?' | '#') || c.is_whitespace()) {
        return Err(invalid("must be a literal path"));
    }
    Ok(trimmed.to_owned())
}

/// Outcome of resolving a path inside one group.
pub(crate) enum GroupMatch {
    Found { handler: BoxedHandler, params: HashMap<String, String> },
    /// The path exists, but only under these methods.
    OtherMethods(Vec<Method>),
    Missing,
}

/// A group after mounting: immutable, shared across requests.
pub(crate) struct MountedGroup {
    pub(crate) prefix: String,
    pub(crate) tag: String,
    trees: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl MountedGroup {
    /// The part of `path` below this group's prefix, if the prefix matches on
    /// a segment boundary. `/games` owns `/games` and `/games/42`, never
    /// `/gamesx`.
    pub(crate) fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        match rest {
            "" => Some("/"),
            _ if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    /// Resolves `rest` (already stripped of the prefix). `HEAD` falls back
    /// to the `GET` handler when no explicit `HEAD` route exists.
    pub(crate) fn resolve(&self, method: Method, rest: &str) -> GroupMatch {
        let lookup = |m: Method| {
            let matched = self.trees.get(&m)?.at(rest).ok()?;
            let params: HashMap<String, String> = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            Some((Arc::clone(matched.value), params))
        };

        let found = lookup(method).or_else(|| {
            if method == Method::Head { lookup(Method::Get) } else { None }
        });
        if let Some((handler, params)) = found {
            return GroupMatch::Found { handler, params };
        }

        let allowed = self.allowed(rest);
        if allowed.is_empty() { GroupMatch::Missing } else { GroupMatch::OtherMethods(allowed) }
    }

    /// Every method with a route for `rest`, sorted. `HEAD` is implied by
    /// `GET`.
    pub(crate) fn allowed(&self, rest: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = self
            .trees
            .iter()
            .filter(|(_, tree)| tree.at(rest).is_ok())
            .map(|(m, _)| *m)
            .collect();
        if allowed.contains(&Method::Get) && !allowed.contains(&Method::Head) {
            allowed.push(Method::Head);
        }
        allowed.sort();
        allowed
    }

    fn claims_root(&self) -> bool {
        [Method::Get, Method::Head]
            .iter()
            .any(|m| self.trees.get(m).is_some_and(|t| t.at("/").is_ok()))
    }
}
