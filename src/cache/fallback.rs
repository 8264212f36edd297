//! Degraded-mode reads: serve the last cached body of a path.
//!
//! A request for `GET /fallback/orders/7` is answered from the entry the
//! interceptor stored for `GET /orders/7`, wrapped as `{"cache": <entry>}`.
//! The reader never contacts an origin.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{CacheBackend, CacheConfig, CacheError, with_timeout};
use crate::context::Context;
use crate::router::{ResponseFuture, Router};
use crate::{Request, Response, StatusCode, telemetry};

/// Result of a fallback lookup, before it is rendered as a response.
#[derive(Debug)]
pub enum FallbackOutcome {
    /// The entry exists and is valid JSON.
    Hit(Value),
    /// No live entry for the key, or the path names no resource.
    NotFound,
    /// The entry exists but does not parse as JSON.
    InvalidData,
    /// The backend could not be read.
    BackendError(CacheError),
}

impl FallbackOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Hit(_) => StatusCode::Ok,
            Self::NotFound => StatusCode::NotFound,
            Self::InvalidData => StatusCode::InternalServerError,
            Self::BackendError(_) => StatusCode::ServiceUnavailable,
        }
    }

    /// Short name used as the `outcome` metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::NotFound => "not_found",
            Self::InvalidData => "invalid_data",
            Self::BackendError(_) => "backend_error",
        }
    }

    /// Renders the JSON envelope.
    ///
    /// | Outcome        | Status | Body                                       |
    /// |----------------|--------|--------------------------------------------|
    /// | `Hit(v)`       | 200    | `{"cache": v}`                             |
    /// | `NotFound`     | 404    | `{"error": "Cache not found"}`             |
    /// | `InvalidData`  | 500    | `{"error": "Invalid JSON data in cache"}`  |
    /// | `BackendError` | 503    | `{"error": "Cache unavailable"}`           |
    pub fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Hit(value) => json!({ "cache": value }),
            Self::NotFound => json!({ "error": "Cache not found" }),
            Self::InvalidData => json!({ "error": "Invalid JSON data in cache" }),
            Self::BackendError(_) => json!({ "error": "Cache unavailable" }),
        };
        Response::json(status, &body)
    }
}

/// Serves `GET {fallback_prefix}{path}` from the response cache.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::Router;
/// use rttp_cache::cache::{CacheConfig, FallbackReader, MemoryBackend};
///
/// let config = Arc::new(CacheConfig::default());
/// let backend = Arc::new(MemoryBackend::from_config(&config));
/// let mut router = Router::new();
/// Arc::new(FallbackReader::new(backend, config)).mount(&mut router);
/// ```
pub struct FallbackReader {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
}

impl FallbackReader {
    pub fn new(backend: Arc<dyn CacheBackend>, config: Arc<CacheConfig>) -> Self {
        Self { backend, config }
    }

    /// Whether `path` lies under the fallback prefix: the prefix itself or
    /// `{prefix}/...`, but not `{prefix}x`.
    pub fn serves(&self, path: &str) -> bool {
        path.strip_prefix(self.config.fallback_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Looks up the entry for the resource `request` names under the
    /// fallback prefix.
    pub async fn lookup(&self, request: &Request) -> FallbackOutcome {
        let Some(key) = self.config.original_key(request) else {
            debug!(path = request.path(), "fallback path names no resource");
            return FallbackOutcome::NotFound;
        };

        let read = with_timeout(self.config.operation_timeout, self.backend.get(&key)).await;
        match read {
            Ok(None) => FallbackOutcome::NotFound,
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => FallbackOutcome::Hit(value),
                Err(e) => {
                    warn!(%key, error = %e, "cached entry is not valid JSON");
                    FallbackOutcome::InvalidData
                }
            },
            Err(e) => {
                warn!(%key, error = %e, "fallback cache read failed");
                FallbackOutcome::BackendError(e)
            }
        }
    }

    /// Route handler: look up, count, render.
    pub async fn handle(&self, ctx: Context) -> Response {
        let outcome = self.lookup(ctx.request()).await;
        debug!(path = ctx.request().path(), outcome = outcome.label(), "fallback served");
        metrics::counter!(telemetry::FALLBACK_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome.into_response()
    }

    /// Registers `GET {fallback_prefix}/*` on `router`.
    pub fn mount(self: Arc<Self>, router: &mut Router) {
        let pattern = format!("{}/*", self.config.fallback_prefix);
        router.get(&pattern, move |ctx: Context| -> ResponseFuture {
            let reader = Arc::clone(&self);
            Box::pin(async move { reader.handle(ctx).await })
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Method;
    use crate::cache::MemoryBackend;
    use crate::cache::testing::{DownBackend, StalledBackend};

    async fn seeded(entries: &[(&str, &str)]) -> (Arc<MemoryBackend>, Arc<CacheConfig>) {
        let backend = Arc::new(MemoryBackend::default());
        for (key, value) in entries {
            backend.set(key, value, Duration::from_secs(60)).await.unwrap();
        }
        (backend, Arc::new(CacheConfig::default()))
    }

    async fn body_json(res: Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target)
    }

    #[tokio::test]
    async fn hit_wraps_entry() {
        let (backend, config) = seeded(&[(
            "/pipeline-service/client/account/secured",
            r#"{"id":1,"name":"A"}"#,
        )])
        .await;
        let reader = FallbackReader::new(backend, config);

        let res = reader
            .handle(Context::new(get("/fallback/pipeline-service/client/account/secured")))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("Content-Type"), Some("application/json"));
        assert_eq!(body_json(res).await, json!({ "cache": { "id": 1, "name": "A" } }));
    }

    #[tokio::test]
    async fn scalar_and_array_entries_are_wrapped() {
        let (backend, config) = seeded(&[("/n", "42"), ("/list", "[1,2]"), ("/s", "\"x\"")]).await;
        let reader = FallbackReader::new(backend, config);

        for (path, expected) in [
            ("/fallback/n", json!(42)),
            ("/fallback/list", json!([1, 2])),
            ("/fallback/s", json!("x")),
        ] {
            let res = reader.handle(Context::new(get(path))).await;
            assert_eq!(body_json(res).await, json!({ "cache": expected }), "{path}");
        }
    }

    #[tokio::test]
    async fn miss_is_not_found() {
        let (backend, config) = seeded(&[]).await;
        let reader = FallbackReader::new(backend, config);

        let res = reader.handle(Context::new(get("/fallback/unknown/path"))).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(body_json(res).await, json!({ "error": "Cache not found" }));
    }

    #[tokio::test]
    async fn bare_prefix_is_not_found() {
        let (backend, config) = seeded(&[("", "{}"), ("/", "{}")]).await;
        let reader = FallbackReader::new(backend, config);

        assert!(matches!(reader.lookup(&get("/fallback")).await, FallbackOutcome::NotFound));
        assert!(matches!(reader.lookup(&get("/fallbackx")).await, FallbackOutcome::NotFound));
        assert!(matches!(reader.lookup(&get("/fallback/")).await, FallbackOutcome::Hit(_)));
    }

    #[tokio::test]
    async fn corrupt_entry_is_invalid_data() {
        let (backend, config) = seeded(&[("/x", "not json{")]).await;
        let reader = FallbackReader::new(backend, config);

        let res = reader.handle(Context::new(get("/fallback/x"))).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(body_json(res).await, json!({ "error": "Invalid JSON data in cache" }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let reader = FallbackReader::new(Arc::new(DownBackend), Arc::new(CacheConfig::default()));

        let outcome = reader.lookup(&get("/fallback/x")).await;
        assert!(matches!(outcome, FallbackOutcome::BackendError(CacheError::Unavailable(_))));

        let res = outcome.into_response();
        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert_eq!(body_json(res).await, json!({ "error": "Cache unavailable" }));
    }

    #[tokio::test]
    async fn stalled_backend_times_out() {
        let config = CacheConfig::default().operation_timeout(Duration::from_millis(20));
        let reader = FallbackReader::new(Arc::new(StalledBackend), Arc::new(config));

        let outcome = reader.lookup(&get("/fallback/x")).await;
        assert!(matches!(outcome, FallbackOutcome::BackendError(CacheError::Timeout(_))));
    }

    #[tokio::test]
    async fn mounted_under_custom_prefix() {
        let backend = Arc::new(MemoryBackend::default());
        backend.set("/orders/7", r#"{"order":7}"#, Duration::from_secs(60)).await.unwrap();
        let config = Arc::new(CacheConfig::new().fallback_prefix("degraded"));

        let mut router = Router::new();
        Arc::new(FallbackReader::new(backend, config)).mount(&mut router);

        let res = router.route(get("/degraded/orders/7")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(body_json(res).await, json!({ "cache": { "order": 7 } }));

        let res = router.route(get("/fallback/orders/7")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }
}
