//! Route table — maps (method, path pattern) to a handler.
//!
//! Built once at `init`, read-only afterward, so lookups take no lock.
//! Matching walks the table in registration order and the first route whose
//! pattern accepts the path *and* whose method matches wins. A path that
//! matched some route but never with the right method resolves to
//! `method_not_allowed`, which callers can tell apart from `not_found`.

use crate::error::ServerError;

/// Which handler a route resolves to. Dispatch is a `match` on this enum in
/// the dispatcher rather than boxed closures, keeping the full route surface
/// visible in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// `GET /health` — liveness probe.
    Health,
    /// `GET /status` — lifecycle + in-flight job count.
    Status,
    /// `POST /completion` — synchronous completion.
    Completion,
    /// `POST /jobs` — submit an asynchronous completion job.
    SubmitJob,
    /// `GET /jobs/{id}` — poll or retrieve a job result.
    JobResult,
    /// `POST /jobs/{id}/cancel` — cooperative cancellation.
    CancelJob,
}

/// Path pattern for a route. Exact patterns are registered ahead of prefix
/// patterns so the most specific route wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == *p,
            PathPattern::Prefix(p) => path.starts_with(p),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub method: &'static str,
    pub pattern: PathPattern,
    pub handler: HandlerKind,
}

/// Immutable, ordered route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// The standard route surface exposed through `json_rpc`.
    pub fn standard() -> Self {
        let mut table = Self { routes: Vec::new() };
        table.register("GET", PathPattern::Exact("/health"), HandlerKind::Health);
        table.register("GET", PathPattern::Exact("/status"), HandlerKind::Status);
        table.register(
            "POST",
            PathPattern::Exact("/completion"),
            HandlerKind::Completion,
        );
        table.register("POST", PathPattern::Exact("/jobs"), HandlerKind::SubmitJob);
        table.register("GET", PathPattern::Prefix("/jobs/"), HandlerKind::JobResult);
        table.register("POST", PathPattern::Prefix("/jobs/"), HandlerKind::CancelJob);
        table
    }

    fn register(&mut self, method: &'static str, pattern: PathPattern, handler: HandlerKind) {
        self.routes.push(Route {
            method,
            pattern,
            handler,
        });
    }

    /// Resolve a (method, path) pair to a route. First match in registration
    /// order wins; duplicate registrations therefore resolve deterministically
    /// to the earliest one.
    pub fn resolve(&self, method: &str, path: &str) -> Result<&Route, ServerError> {
        let mut path_matched = false;
        for route in &self.routes {
            if !route.pattern.matches(path) {
                continue;
            }
            if route.method == method {
                return Ok(route);
            }
            path_matched = true;
        }

        if path_matched {
            Err(ServerError::MethodNotAllowed(format!(
                "{} not allowed on {}",
                method, path
            )))
        } else {
            Err(ServerError::NotFound(format!("no route for {}", path)))
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
