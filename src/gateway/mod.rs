//! The gateway: one middleware stack in front of a router, with the response
//! cache and the fallback entry point wired in.
//!
//! Request flow:
//!
//! ```text
//! request ─▶ LoggerMiddleware ─▶ ResponseCacheMiddleware ─▶ layers... ─▶ endpoint
//!                                                                          │
//!                        GET {prefix}/... ─▶ FallbackReader ◀──────────────┤
//!                         everything else ─▶ origin Router  ◀──────────────┘
//! ```
//!
//! With failover enabled, a `GET` whose origin answers 502, 503 or 504 is
//! dispatched again as `GET {prefix}{path}` through the same stack, so the
//! client receives the last cached body instead of the gateway error.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheBackend, CacheConfig, FallbackReader, ResponseCacheMiddleware};
use crate::context::Context;
use crate::middleware::{LoggerMiddleware, MiddlewareHandler, Next, from_middleware};
use crate::router::{Handler, ResponseFuture};
use crate::server::{Server, ServerError};
use crate::{Method, Request, Response, Router, telemetry};

/// A request handler with response caching and cache fallback.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{Gateway, Response, Router, Server, StatusCode};
/// use rttp_cache::cache::{CacheConfig, MemoryBackend};
/// use rttp_cache::context::Context;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = CacheConfig::from_env();
///     let backend = Arc::new(MemoryBackend::from_config(&config));
///
///     let mut router = Router::new();
///     router.get("/orders/:id", |ctx: Context| async move {
///         let id = ctx.params().get("id").unwrap_or("0").to_owned();
///         Response::new(StatusCode::Ok)
///             .header("Content-Type", "application/json")
///             .body(format!("{{\"order\":{id}}}"))
///     });
///
///     let gateway = Gateway::builder(backend).config(config).router(router).build();
///     gateway.serve(Server::bind("127.0.0.1:8080").await?).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Gateway {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
    config: Arc<CacheConfig>,
    failover: bool,
}

impl Gateway {
    pub fn builder(backend: Arc<dyn CacheBackend>) -> GatewayBuilder {
        GatewayBuilder {
            backend,
            config: CacheConfig::default(),
            router: Router::new(),
            layers: Vec::new(),
            failover: true,
        }
    }

    /// The cache configuration shared by both cache components.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Runs `request` through the stack, failing over to the cache when the
    /// origin reports a gateway error.
    pub async fn handle(&self, request: Request) -> Response {
        let failover_target = self.failover_target(&request);
        let response = self.dispatch(request.clone()).await;

        match failover_target {
            Some(target) if response.status().is_gateway_failure() => {
                info!(
                    path = request.path(),
                    status = response.status().as_u16(),
                    fallback = %target,
                    "origin failed, serving from cache"
                );
                metrics::counter!(telemetry::FAILOVERS_TOTAL).increment(1);
                self.dispatch(request.forwarded_to(target)).await
            }
            _ => response,
        }
    }

    /// Accepts connections on `server` until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener itself fails.
    pub async fn serve(self, server: Server) -> Result<(), ServerError> {
        server
            .run(move |request| {
                let gateway = self.clone();
                async move { gateway.handle(request).await }
            })
            .await
    }

    async fn dispatch(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint))
            .run(Context::new(request))
            .await
    }

    // The fallback path for `request`, if a failure on it should be retried
    // from the cache.
    fn failover_target(&self, request: &Request) -> Option<String> {
        let eligible = self.failover
            && request.method() == &Method::Get
            && !self.config.is_excluded(request.path());
        eligible.then(|| self.config.fallback_path(request.path()))
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    router: Router,
    layers: Vec<MiddlewareHandler>,
    failover: bool,
}

impl GatewayBuilder {
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// The origin routes. Requests under the fallback prefix never reach
    /// them.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends a middleware after the cache layer, closer to the router.
    #[must_use]
    pub fn layer(mut self, layer: MiddlewareHandler) -> Self {
        self.layers.push(layer);
        self
    }

    /// Whether 502/503/504 on a `GET` is retried from the cache. On by
    /// default.
    #[must_use]
    pub fn failover(mut self, enabled: bool) -> Self {
        self.failover = enabled;
        self
    }

    pub fn build(self) -> Gateway {
        let config = Arc::new(self.config);
        let reader = Arc::new(FallbackReader::new(
            Arc::clone(&self.backend),
            Arc::clone(&config),
        ));
        let origin = self.router.into_endpoint();

        // Fallback reads are answered before origin routes, so a catch-all
        // origin route cannot shadow them.
        let endpoint: Handler = Arc::new(move |ctx: Context| -> ResponseFuture {
            if ctx.request().method() == &Method::Get && reader.serves(ctx.request().path()) {
                let reader = Arc::clone(&reader);
                Box::pin(async move { reader.handle(ctx).await })
            } else {
                origin(ctx)
            }
        });

        let mut middlewares = vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_middleware(Arc::new(ResponseCacheMiddleware::new(
                self.backend,
                Arc::clone(&config),
            ))),
        ];
        middlewares.extend(self.layers);

        info!(
            ttl = ?config.ttl,
            fallback_prefix = %config.fallback_prefix,
            failover = self.failover,
            "gateway built"
        );

        Gateway {
            middlewares: middlewares.into(),
            endpoint,
            config,
            failover: self.failover,
        }
    }
}
