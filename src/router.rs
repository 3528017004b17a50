//! Longest-prefix dispatch table over mounted route groups.
//!
//! Built once by the assembler, then shared read-only by every connection
//! task. No locks: the table never changes after startup.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::group::{GroupMatch, MountedGroup};
use crate::handler::BoxedHandler;
use crate::method::Method;

/// Result of resolving a request against the whole table.
pub(crate) enum Resolved<'a> {
    Handler {
        handler: BoxedHandler,
        params: HashMap<String, String>,
        tag: &'a str,
    },
    /// Some group knows the path, under other methods only.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

pub(crate) struct RouteTable {
    // Longest prefix first; mount order among equal lengths.
    groups: Vec<MountedGroup>,
}

impl RouteTable {
    pub(crate) fn new(mut groups: Vec<MountedGroup>) -> Self {
        // Stable sort keeps registration order for equal-length prefixes.
        groups.sort_by_key(|g| Reverse(g.prefix.len()));
        Self { groups }
    }

    /// Tries each group whose prefix owns `path`, most specific first. The
    /// first group that resolves the remainder handles the request.
    pub(crate) fn resolve(&self, method: Method, path: &str) -> Resolved<'_> {
        let mut allowed: Vec<Method> = Vec::new();

        for group in &self.groups {
            let Some(rest) = group.strip(path) else { continue };
            match group.resolve(method, rest) {
                GroupMatch::Found { handler, params } => {
                    return Resolved::Handler { handler, params, tag: &group.tag };
                }
                GroupMatch::OtherMethods(methods) => allowed.extend(methods),
                GroupMatch::Missing => {}
            }
        }

        if allowed.is_empty() {
            Resolved::NotFound
        } else {
            allowed.sort();
            allowed.dedup();
            Resolved::MethodNotAllowed(allowed)
        }
    }

    /// Methods routable at `path` across every group that owns it. Used to
    /// answer methods no group can register.
    pub(crate) fn allowed(&self, path: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = self
            .groups
            .iter()
            .filter_map(|g| g.strip(path).map(|rest| g.allowed(rest)))
            .flatten()
            .collect();
        allowed.sort();
        allowed.dedup();
        allowed
    }

    /// Mounted `(prefix, tag)` pairs in resolution order.
    pub(crate) fn mounts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.groups.iter().map(|g| (g.prefix.as_str(), g.tag.as_str()))
    }
}
