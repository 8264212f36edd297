//! Write-through response cache middleware.
//!
//! [`ResponseCacheMiddleware`] never changes what the client receives. For an
//! eligible response it wraps the body so that every chunk is forwarded as
//! soon as the origin produces it, while a copy accumulates on the side. Only
//! when the origin's stream has ended cleanly is the copy written to the
//! backend, on a detached task. A stream that errors, or is dropped because
//! the client went away, never produces a write.
//!
//! Eligibility:
//!
//! 1. the method is `GET`,
//! 2. the path is not excluded ([`CacheConfig::is_excluded`]),
//! 3. the response status is 2xx,
//! 4. the complete body is valid UTF-8 (the store holds text).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, ready};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use pin_project_lite::pin_project;
use tracing::{debug, warn};

use super::{CacheBackend, CacheConfig, with_timeout};
use crate::context::Context;
use crate::http::{Body, BodyError};
use crate::middleware::{Middleware, Next};
use crate::router::ResponseFuture;
use crate::{Method, telemetry};

/// Middleware that stores successful `GET` response bodies in a
/// [`CacheBackend`] under the request path.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::cache::{CacheConfig, MemoryBackend, ResponseCacheMiddleware};
/// use rttp_cache::middleware::from_middleware;
///
/// let config = Arc::new(CacheConfig::default());
/// let backend = Arc::new(MemoryBackend::from_config(&config));
/// let layer = from_middleware(Arc::new(ResponseCacheMiddleware::new(backend, config)));
/// ```
pub struct ResponseCacheMiddleware {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
}

impl ResponseCacheMiddleware {
    pub fn new(backend: Arc<dyn CacheBackend>, config: Arc<CacheConfig>) -> Self {
        Self { backend, config }
    }

    fn writer(&self) -> CacheWriter {
        CacheWriter {
            backend: Arc::clone(&self.backend),
            ttl: self.config.ttl,
            timeout: self.config.operation_timeout,
        }
    }
}

impl Middleware for ResponseCacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        let request = ctx.request();
        if request.method() != &Method::Get || self.config.is_excluded(request.path()) {
            return Box::pin(next.run(ctx));
        }

        let key = self.config.cache_key(request);
        let writer = self.writer();

        Box::pin(async move {
            let response = next.run(ctx).await;
            if !response.status().is_success() {
                debug!(%key, status = response.status().as_u16(), "not caching unsuccessful response");
                return response;
            }
            response.map_body(|body| writer.observe(key, body))
        })
    }
}

// Everything a detached write needs, detached from the middleware's lifetime.
struct CacheWriter {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    timeout: Duration,
}

impl CacheWriter {
    // Full bodies are already complete; streams are written once drained.
    fn observe(self, key: String, body: Body) -> Body {
        match body {
            Body::Full(bytes) => {
                self.spawn_write(key, bytes.clone());
                Body::Full(bytes)
            }
            Body::Stream(inner) => Body::from_stream(CachingBody::new(inner, key, self)),
        }
    }

    fn spawn_write(self, key: String, content: Bytes) {
        let text = match std::str::from_utf8(&content) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                debug!(%key, bytes = content.len(), "response body is not UTF-8; not caching");
                return;
            }
        };

        tokio::spawn(async move {
            match with_timeout(self.timeout, self.backend.set(&key, &text, self.ttl)).await {
                Ok(()) => {
                    debug!(%key, bytes = text.len(), ttl = ?self.ttl, "cached response");
                    metrics::counter!(telemetry::CACHE_WRITES_TOTAL, "status" => "ok").increment(1);
                }
                Err(e) => {
                    warn!(%key, error = %e, "failed to cache response");
                    metrics::counter!(telemetry::CACHE_WRITES_TOTAL, "status" => "error")
                        .increment(1);
                }
            }
        });
    }
}

pin_project! {
    // Forwards each chunk unchanged while keeping a copy; issues the cache
    // write when the inner stream ends. `pending` is taken exactly once, by
    // either the write or the first error.
    struct CachingBody<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        pending: Option<(String, CacheWriter)>,
    }
}

impl<S> CachingBody<S> {
    fn new(inner: S, key: String, writer: CacheWriter) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            pending: Some((key, writer)),
        }
    }
}

impl<S> Stream for CachingBody<S>
where
    S: Stream<Item = Result<Bytes, BodyError>>,
{
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                if this.pending.is_some() {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                if let Some((key, _)) = this.pending.take() {
                    debug!(%key, error = %e, "response body failed; not caching partial body");
                    this.buffer.clear();
                }
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some((key, writer)) = this.pending.take() {
                    writer.spawn_write(key, std::mem::take(this.buffer).freeze());
                }
                Poll::Ready(None)
            }
        }
    }
}
