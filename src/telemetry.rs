//! Metric names.
//!
//! Hosts install their own `metrics` recorder (prometheus, statsd, ...);
//! without one every metric call is a no-op.
//!
//! All names are prefixed with `rttp_`. Counters end in `_total`.

/// Completed cache writes.
///
/// Labels: `status` ("ok" | "error").
pub const CACHE_WRITES_TOTAL: &str = "rttp_cache_writes_total";

/// Fallback lookups served.
///
/// Labels: `outcome` ("hit" | "not_found" | "invalid_data" | "backend_error").
pub const FALLBACK_TOTAL: &str = "rttp_cache_fallback_total";

/// Requests re-dispatched to the fallback entry point after the origin
/// answered 502, 503 or 504.
pub const FAILOVERS_TOTAL: &str = "rttp_gateway_failovers_total";
