//! Route model (C2, polymorphic route shape) and the route table used by
//! the REST dispatcher (C6).

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::fs_engine::{FilterSpec, PaginationOverride};
use crate::http::{HttpHandler, Method};
use crate::pattern::CompiledPattern;

/// What a route delegates execution to. Tagged variants sharing the common
/// prefix (pattern, method, disabled, delay) described in spec.md §9.
pub enum RouteKind {
    /// A user-supplied handler function.
    Function(Arc<dyn HttpHandler>),
    /// Delegates entirely to the filesystem resource engine using the
    /// gateway's global pagination/filter configuration.
    Fs,
    /// Delegates to the FS engine but layers route-specific pagination
    /// and/or filter overrides on top of the global configuration.
    FsWithOverrides {
        pagination: PaginationOverride,
        filters: Option<Vec<FilterSpec>>,
    },
}

pub struct Route {
    pub pattern: CompiledPattern,
    pub method: Method,
    pub disabled: bool,
    pub delay: Option<Duration>,
    pub kind: RouteKind,
}

impl Route {
    pub fn function(pattern: CompiledPattern, method: Method, handler: Arc<dyn HttpHandler>) -> Self {
        Self {
            pattern,
            method,
            disabled: false,
            delay: None,
            kind: RouteKind::Function(handler),
        }
    }

    pub fn fs(pattern: CompiledPattern, method: Method) -> Self {
        Self {
            pattern,
            method,
            disabled: false,
            delay: None,
            kind: RouteKind::Fs,
        }
    }
}

/// Ordered route registry. Matching by (pattern, method) keeps
/// first-registered-wins semantics (spec.md §9) and logs duplicate
/// registrations at startup.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route) {
        let collision = self.routes.iter().any(|existing| {
            existing.method == route.method && existing.pattern.source() == route.pattern.source()
        });
        if collision {
            warn!(
                "duplicate route registered for [{}] {} — first registration wins",
                route.method,
                route.pattern.source()
            );
        }
        self.routes.push(route);
    }

    /// First matching, non-disabled route for `(method, path)`, plus its
    /// captured parameters.
    pub fn find(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(&Route, std::collections::HashMap<String, String>)> {
        self.routes
            .iter()
            .filter(|r| !r.disabled && r.method == method)
            .find_map(|r| r.pattern.matches(path).map(|params| (r, params)))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
