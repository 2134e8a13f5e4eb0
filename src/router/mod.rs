//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! | Pattern              | Example match       | Captured params   |
//! |----------------------|---------------------|-------------------|
//! | `/api/stats`         | `/api/stats`        | *(none)*          |
//! | `/api/cats/:code`    | `/api/cats/418`     | `code → "418"`    |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so
//! `/api/stats/` and `/api/stats` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins. A path that matches some route under a different
//! method is answered with `405 Method Not Allowed`, anything else with
//! `404 Not Found`. Both fallbacks still pass through the middleware chain.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::context::{Context, PathParams};
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};

/// Type-erased async handler that turns a [`Context`] into a [`Response`].
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/api/stats`.
    Exact(String),
    // Matches a fixed number of segments where some are named captures.
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_owned()),
                    None => Segment::Static(s.to_owned()),
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_owned())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (segment, value) in segments.iter().zip(path_segments) {
                    match segment {
                        Segment::Static(s) if s != value => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.as_str(), value),
                    }
                }
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router with an ordered middleware chain.
///
/// # Examples
///
/// ```rust
/// use cat_cache::http::{Response, StatusCode};
/// use cat_cache::router::Router;
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
/// router.get("/api/cats/:code", |ctx| async move {
///     let code = ctx.param("code").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(code)
/// });
/// assert_eq!(router.len(), 2);
/// ```
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<MiddlewareHandler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Get, path, handler);
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Delete, path, handler);
    }

    fn add_route<H, F>(&mut self, method: Method, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: Context| handler(ctx).boxed());
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    /// Appends a middleware. Middleware runs in registration order, outermost first.
    pub fn layer<M>(&mut self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.middleware.push(from_middleware(Arc::new(middleware)));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Turns the router into something [`Server::run_until`] can call.
    ///
    /// [`Server::run_until`]: crate::server::Server::run_until
    pub fn into_service(
        self,
    ) -> impl Fn(Request) -> BoxFuture<'static, Response> + Send + Sync + 'static {
        let router = Arc::new(self);
        move |request: Request| {
            let router = Arc::clone(&router);
            async move { router.route(request).await }.boxed()
        }
    }

    /// Dispatches `request` through the middleware chain to the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let (endpoint, params) = self.resolve(request.method(), request.path());
        let ctx = Context::with_params(request, params);
        let chain: Arc<[MiddlewareHandler]> = self.middleware.as_slice().into();
        Next::new(chain, endpoint).run(ctx).await
    }

    fn resolve(&self, method: &Method, path: &str) -> (Handler, PathParams) {
        let mut path_known = false;
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if &route.method == method {
                    return (Arc::clone(&route.handler), params);
                }
                path_known = true;
            }
        }

        let status = if path_known {
            StatusCode::MethodNotAllowed
        } else {
            StatusCode::NotFound
        };
        let fallback: Handler = Arc::new(move |_ctx: Context| {
            async move { Response::text(status, status.canonical_reason()) }.boxed()
        });
        (fallback, PathParams::new())
    }
}
