//! Cache policy shared by the interceptor and the fallback reader.
//!
//! Both components take the same `Arc<CacheConfig>` at construction, so the
//! key they write and the key they read back are always derived the same way.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use super::key;
use crate::Request;

/// TTL applied to every cache write.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Path prefix of the fallback entry point.
pub const DEFAULT_FALLBACK_PREFIX: &str = "/fallback";

/// Operational paths that are never cached, matched by whole segment.
pub const DEFAULT_EXCLUDED_SEGMENTS: &[&str] = &["/actuator", "/health", "/metrics"];

/// Upper bound on a single backend `get` or `set`.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the in-memory backend.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Whether the query string takes part in the cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKeyMode {
    /// `/items?page=2` and `/items` share the key `/items`.
    #[default]
    Ignore,
    /// `/items?page=2` is keyed as `/items?page=2`.
    Include,
}

/// Response cache configuration.
///
/// Build one with [`CacheConfig::new`] and the builder methods, load it from
/// the environment with [`CacheConfig::from_env`], or deserialize it from a
/// host config file (`ttl_secs`, `fallback_prefix`, `excluded_segments`,
/// `query_keys`, `operation_timeout_ms`, `max_entries`).
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::cache::{CacheConfig, QueryKeyMode};
///
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(30))
///     .exclude("/internal")
///     .query_keys(QueryKeyMode::Include);
///
/// assert!(config.is_excluded("/internal/status"));
/// assert!(config.is_excluded("/fallback/orders"));
/// assert!(!config.is_excluded("/orders"));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "ttl_secs", deserialize_with = "duration_from_secs")]
    pub ttl: Duration,
    #[serde(deserialize_with = "prefix_from_str")]
    pub fallback_prefix: String,
    pub excluded_segments: Vec<String>,
    pub query_keys: QueryKeyMode,
    #[serde(
        rename = "operation_timeout_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub operation_timeout: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            fallback_prefix: DEFAULT_FALLBACK_PREFIX.to_owned(),
            excluded_segments: DEFAULT_EXCLUDED_SEGMENTS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            query_keys: QueryKeyMode::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `RTTP_CACHE_*` environment variables.
    ///
    /// | Variable                      | Meaning                               |
    /// |-------------------------------|---------------------------------------|
    /// | `RTTP_CACHE_TTL_SECS`         | write TTL in seconds                  |
    /// | `RTTP_CACHE_FALLBACK_PREFIX`  | fallback entry point prefix           |
    /// | `RTTP_CACHE_EXCLUDED`         | comma-separated excluded segments     |
    /// | `RTTP_CACHE_QUERY_KEYS`       | `ignore` or `include`                 |
    /// | `RTTP_CACHE_TIMEOUT_MS`       | backend operation timeout             |
    /// | `RTTP_CACHE_MAX_ENTRIES`      | in-memory backend capacity            |
    ///
    /// Missing variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, "RTTP_CACHE_TTL_SECS") {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(prefix) = lookup("RTTP_CACHE_FALLBACK_PREFIX") {
            config = config.fallback_prefix(prefix);
        }
        if let Some(list) = lookup("RTTP_CACHE_EXCLUDED") {
            config.excluded_segments = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(key::normalize_segment)
                .collect();
        }
        if let Some(mode) = lookup("RTTP_CACHE_QUERY_KEYS") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "ignore" => config.query_keys = QueryKeyMode::Ignore,
                "include" => config.query_keys = QueryKeyMode::Include,
                other => warn!(value = other, "ignoring invalid RTTP_CACHE_QUERY_KEYS"),
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "RTTP_CACHE_TIMEOUT_MS") {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u64>(&lookup, "RTTP_CACHE_MAX_ENTRIES") {
            config.max_entries = n;
        }

        config
    }

    /// Sets the TTL applied to every write.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the fallback prefix. A missing leading `/` is added and a trailing
    /// `/` dropped, so `"fallback/"` becomes `"/fallback"`.
    #[must_use]
    pub fn fallback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fallback_prefix = key::normalize_segment(&prefix.into());
        self
    }

    /// Adds an excluded path segment.
    #[must_use]
    pub fn exclude(mut self, segment: impl AsRef<str>) -> Self {
        self.excluded_segments
            .push(key::normalize_segment(segment.as_ref()));
        self
    }

    /// Sets whether the query string is part of the key.
    #[must_use]
    pub fn query_keys(mut self, mode: QueryKeyMode) -> Self {
        self.query_keys = mode;
        self
    }

    /// Sets the timeout applied to each backend call.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the capacity of the in-memory backend.
    #[must_use]
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Returns `true` if responses for `path` must never be cached: the path
    /// contains an excluded segment or the fallback prefix.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.is_fallback_path(path)
            || self
                .excluded_segments
                .iter()
                .any(|segment| key::contains_segment(path, segment))
    }

    /// Returns `true` if `path` lies under the fallback prefix, anywhere in
    /// the path.
    pub fn is_fallback_path(&self, path: &str) -> bool {
        key::contains_segment(path, &self.fallback_prefix)
    }

    /// The key the interceptor writes for `request`.
    pub fn cache_key(&self, request: &Request) -> String {
        key::cache_key(request.path(), request.query_string(), self.query_keys)
    }

    /// The fallback entry point for an original resource path.
    pub fn fallback_path(&self, path: &str) -> String {
        key::fallback_path(&self.fallback_prefix, path)
    }

    /// The key the fallback reader looks up for a request on the fallback
    /// path; `None` if the path does not name a resource under the prefix.
    pub fn original_key(&self, request: &Request) -> Option<String> {
        let original = key::strip_fallback_prefix(&self.fallback_prefix, request.path())?;
        Some(key::cache_key(
            original,
            request.query_string(),
            self.query_keys,
        ))
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable cache setting");
            None
        }
    }
}

fn duration_from_secs<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    u64::deserialize(de).map(Duration::from_secs)
}

fn duration_from_millis<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    u64::deserialize(de).map(Duration::from_millis)
}

fn prefix_from_str<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    String::deserialize(de).map(|s| key::normalize_segment(&s))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::Method;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.fallback_prefix, "/fallback");
        assert_eq!(config.query_keys, QueryKeyMode::Ignore);
        assert_eq!(config.operation_timeout, Duration::from_secs(2));
        assert_eq!(config.max_entries, 10_000);
    }

    #[test]
    fn exclusions() {
        let config = CacheConfig::default();
        assert!(config.is_excluded("/actuator/health"));
        assert!(config.is_excluded("/actuator"));
        assert!(config.is_excluded("/orders-service/health"));
        assert!(config.is_excluded("/fallback/pipeline-service/client"));
        assert!(config.is_excluded("/svc/metrics/"));
        assert!(!config.is_excluded("/healthcare-service/patients"));
        assert!(!config.is_excluded("/pipeline-service/client/account/secured"));
    }

    #[test]
    fn prefix_is_normalized() {
        let config = CacheConfig::new().fallback_prefix("degraded/");
        assert_eq!(config.fallback_prefix, "/degraded");
        assert!(config.is_excluded("/degraded/x"));
        assert!(!config.is_excluded("/fallback/x"));
    }

    #[test]
    fn keys_round_trip_through_fallback_path() {
        for mode in [QueryKeyMode::Ignore, QueryKeyMode::Include] {
            let config = CacheConfig::new().query_keys(mode);
            for target in ["/a", "/a/b?x=1", "/", "/fallback/nested"] {
                let original = Request::new(Method::Get, target);
                let fallback_target = match original.query_string() {
                    Some(q) => format!("{}?{q}", config.fallback_path(original.path())),
                    None => config.fallback_path(original.path()),
                };
                let fallback = Request::new(Method::Get, &fallback_target);
                assert_eq!(
                    config.original_key(&fallback),
                    Some(config.cache_key(&original)),
                    "{mode:?} {target}"
                );
            }
        }
    }

    #[test]
    fn query_mode_changes_key() {
        let req = Request::new(Method::Get, "/items?page=2");
        assert_eq!(CacheConfig::new().cache_key(&req), "/items");
        assert_eq!(
            CacheConfig::new()
                .query_keys(QueryKeyMode::Include)
                .cache_key(&req),
            "/items?page=2"
        );
    }

    #[test]
    fn from_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("RTTP_CACHE_TTL_SECS", "30"),
            ("RTTP_CACHE_FALLBACK_PREFIX", "/degraded"),
            ("RTTP_CACHE_EXCLUDED", "/ping, status ,"),
            ("RTTP_CACHE_QUERY_KEYS", "Include"),
            ("RTTP_CACHE_TIMEOUT_MS", "250"),
            ("RTTP_CACHE_MAX_ENTRIES", "not-a-number"),
        ]);
        let config = CacheConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned()));
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.fallback_prefix, "/degraded");
        assert_eq!(config.excluded_segments, vec!["/ping", "/status"]);
        assert_eq!(config.query_keys, QueryKeyMode::Include);
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn deserialize_partial() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"ttl_secs": 60, "fallback_prefix": "fb", "query_keys": "include"}"#,
        )
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.fallback_prefix, "/fb");
        assert_eq!(config.query_keys, QueryKeyMode::Include);
        assert_eq!(config.excluded_segments.len(), DEFAULT_EXCLUDED_SEGMENTS.len());
    }
}
