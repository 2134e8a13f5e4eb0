//! Middleware pipeline: composable before/after logic around route handlers.
//!
//! Every request that reaches the [`Router`](crate::router::Router) walks the
//! registered middleware in order and ends at the matched handler (or at the
//! router's fallback). Each layer may pass the request through, answer it
//! itself, or decorate the response on the way back.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply cloneable middleware function.
//! - [`LoggerMiddleware`]: one structured log line per request.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::context::Context;
use crate::http::Response;
use crate::router::Handler;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward the
/// request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use futures::future::{BoxFuture, FutureExt};
/// use cat_cache::{context::Context, http::Response, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
///         next.run(ctx).boxed()
///     }
/// }
/// ```
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    // Position of the middleware invoked by the next `run` call.
    index: usize,
    endpoint: Handler,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Positions a cursor at the start of `chain`, ending at `endpoint`.
    pub fn new(chain: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            chain,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware, or the endpoint once the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                self.index += 1;
                middleware(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass
/// through (`next.run(ctx).await`), short-circuit by returning a [`Response`]
/// without calling `next`, or decorate the response `next` produced.
///
/// Implementations are shared across Tokio tasks and must not hold locks
/// across an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response>;
}

/// Logs method, path, status and elapsed time once the response is ready.
///
/// Server errors are logged at `warn`, everything else at `info`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use cat_cache::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            if status >= 500 {
                tracing::warn!(%method, %path, status, ?elapsed, "request failed");
            } else {
                tracing::info!(%method, %path, status, ?elapsed, "request served");
            }

            response
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::http::{Request, StatusCode};

    fn context() -> Context {
        let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        Context::new(request)
    }

    fn endpoint() -> Handler {
        Arc::new(|_ctx: Context| async { Response::new(StatusCode::Ok).body("endpoint") }.boxed())
    }

    /// Records its name on the way in and out.
    fn tracer(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> MiddlewareHandler {
        Arc::new(move |ctx: Context, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("> {name}"));
                let response = next.run(ctx).await;
                log.lock().push(format!("< {name}"));
                response
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn layers_run_in_order_around_the_endpoint() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Arc<[MiddlewareHandler]> =
            vec![tracer("a", log.clone()), tracer("b", log.clone())].into();

        let response = Next::new(chain, endpoint()).run(context()).await;

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(*log.lock(), ["> a", "> b", "< b", "< a"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let gate: MiddlewareHandler = Arc::new(|_ctx: Context, _next: Next| {
            async { Response::new(StatusCode::ServiceUnavailable) }.boxed()
        });
        let response = Next::new(vec![gate].into(), endpoint())
            .run(context())
            .await;
        assert_eq!(response.status(), StatusCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let chain: Arc<[MiddlewareHandler]> =
            vec![from_middleware(Arc::new(LoggerMiddleware))].into();
        let response = Next::new(chain, endpoint()).run(context()).await;
        assert_eq!(response.body_ref().as_ref(), b"endpoint");
    }
}
