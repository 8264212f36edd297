//! Cache key derivation.
//!
//! The interceptor keys an entry by the request path (plus the query string
//! under [`QueryKeyMode::Include`]). The fallback entry point serves
//! `prefix + path`, and [`strip_fallback_prefix`] removes exactly that
//! prefix, once, so `strip_fallback_prefix(p, &fallback_path(p, path))` is
//! always `Some(path)` for a path starting with `/`.

use super::QueryKeyMode;

/// The key stored for a request on `path` with an optional raw `query`.
pub fn cache_key(path: &str, query: Option<&str>, mode: QueryKeyMode) -> String {
    match (mode, query) {
        (QueryKeyMode::Include, Some(query)) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_owned(),
    }
}

/// The fallback entry point for `path`.
pub fn fallback_path(prefix: &str, path: &str) -> String {
    format!("{prefix}{path}")
}

/// Recovers the original resource path from a fallback path.
///
/// Returns `None` when `path` does not start with `prefix` followed by a
/// resource path, e.g. `/fallback` alone or `/fallbacks/x`.
pub fn strip_fallback_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .filter(|original| original.starts_with('/'))
}

/// Returns `true` if `segment` (e.g. `/actuator`) occurs in `path` as whole
/// segments: followed by `/` or the end of the path.
pub fn contains_segment(path: &str, segment: &str) -> bool {
    if segment.is_empty() || segment == "/" {
        return false;
    }
    path.match_indices(segment).any(|(at, _)| {
        let rest = &path[at + segment.len()..];
        rest.is_empty() || rest.starts_with('/')
    })
}

/// Canonical form for configured segments and prefixes: one leading `/`, no
/// trailing `/`.
pub fn normalize_segment(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    format!("/{trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_the_untouched_path() {
        let path = "/pipeline-service/client/account/secured";
        assert_eq!(cache_key(path, None, QueryKeyMode::Ignore), path);
        assert_eq!(cache_key(path, Some("a=1"), QueryKeyMode::Ignore), path);
    }

    #[test]
    fn include_mode_appends_query() {
        assert_eq!(cache_key("/p", Some("a=1&b=2"), QueryKeyMode::Include), "/p?a=1&b=2");
        assert_eq!(cache_key("/p", Some(""), QueryKeyMode::Include), "/p");
        assert_eq!(cache_key("/p", None, QueryKeyMode::Include), "/p");
    }

    #[test]
    fn strip_inverts_prefixing() {
        for path in [
            "/",
            "/a",
            "/pipeline-service/client/account/secured",
            "/fallback",
            "/fallback/x",
            "/a//b/",
            "/ünïcode/パス",
        ] {
            let fb = fallback_path("/fallback", path);
            assert_eq!(strip_fallback_prefix("/fallback", &fb), Some(path), "{path}");
        }
    }

    #[test]
    fn strip_removes_the_prefix_once() {
        assert_eq!(
            strip_fallback_prefix("/fallback", "/fallback/fallback/x"),
            Some("/fallback/x")
        );
    }

    #[test]
    fn strip_rejects_non_resource_paths() {
        assert_eq!(strip_fallback_prefix("/fallback", "/fallback"), None);
        assert_eq!(strip_fallback_prefix("/fallback", "/fallbacks/x"), None);
        assert_eq!(strip_fallback_prefix("/fallback", "/orders/fallback/x"), None);
        assert_eq!(strip_fallback_prefix("/fallback", ""), None);
    }

    #[test]
    fn segment_matching() {
        assert!(contains_segment("/actuator/health", "/actuator"));
        assert!(contains_segment("/actuator", "/actuator"));
        assert!(contains_segment("/svc/actuator/info", "/actuator"));
        assert!(!contains_segment("/actuators", "/actuator"));
        assert!(contains_segment("/healthz/health", "/health"));
        assert!(!contains_segment("/healthz", "/health"));
        assert!(!contains_segment("/anything", ""));
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_segment("fallback"), "/fallback");
        assert_eq!(normalize_segment(" /fallback/ "), "/fallback");
        assert_eq!(normalize_segment("/a/b"), "/a/b");
    }
}
