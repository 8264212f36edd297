//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, so it can inspect the request,
//! short-circuit with its own response, or decorate the downstream response.
//! The response cache ([`crate::cache::ResponseCacheMiddleware`]) is one such
//! layer: it passes every request through and decorates eligible responses.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::sync::Arc;
use tokio::time::Instant;

use crate::{
    Response,
    context::Context,
    router::{Handler, ResponseFuture},
};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once. When every middleware has run, the endpoint (usually
/// the router) produces the response.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::{context::Context, middleware::{Middleware, Next}, router::ResponseFuture};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{context::Context, middleware::{MiddlewareHandler, Next}, router::ResponseFuture};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> ResponseFuture {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a cursor positioned at the start of `middlewares`, ending in
    /// `endpoint`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain, or the endpoint once the
    /// chain is exhausted, and returns its response.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(ctx, self).await
        } else {
            (self.endpoint)(ctx).await
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations are shared across Tokio tasks, so they must be
/// `Send + Sync` and must not hold per-request state in `self`.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// Logs each request's method, path, status, and duration.
///
/// Emits one `tracing::info!` record after the downstream handler returns.
/// For streamed responses the duration covers time to response head, not
/// time to last byte.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Request, StatusCode};
    use std::sync::Mutex;

    fn endpoint(status: StatusCode) -> Handler {
        Arc::new(move |_ctx: Context| -> ResponseFuture {
            Box::pin(async move { Response::new(status) })
        })
    }

    fn recording(log: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> MiddlewareHandler {
        Arc::new(move |ctx: Context, next: Next| -> ResponseFuture {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(name);
                next.run(ctx).await
            })
        })
    }

    #[tokio::test]
    async fn empty_chain_calls_endpoint() {
        let next = Next::new(Arc::from(Vec::new()), endpoint(StatusCode::Accepted));
        let res = next.run(Context::new(Request::new(Method::Get, "/"))).await;
        assert_eq!(res.status(), StatusCode::Accepted);
    }

    #[tokio::test]
    async fn middlewares_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<MiddlewareHandler> = vec![
            recording(Arc::clone(&log), "first"),
            recording(Arc::clone(&log), "second"),
            from_middleware(Arc::new(LoggerMiddleware)),
        ];
        let next = Next::new(Arc::from(chain), endpoint(StatusCode::Ok));
        let res = next.run(Context::new(Request::new(Method::Get, "/x"))).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let deny: MiddlewareHandler = Arc::new(|_ctx: Context, _next: Next| -> ResponseFuture {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        });
        let next = Next::new(Arc::from(vec![deny]), endpoint(StatusCode::Ok));
        let res = next.run(Context::new(Request::new(Method::Get, "/"))).await;
        assert_eq!(res.status(), StatusCode::Forbidden);
    }
}
