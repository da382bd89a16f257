//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `tier`: cache tier answering a lookup: "local" or "remote"
//! - `operation`: store operation being retried (e.g. "get_user_quota")
//! - `provider`: provider name (e.g. "midjourney", "http")
//! - `status`: outcome: "ok" or "error"

/// Total cache hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total cache misses (both tiers missed).
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total callers that attached to an already in-flight computation.
pub const COALESCED_WAITS_TOTAL: &str = "heimdall_coalesced_waits_total";

/// Total callers that gave up waiting on a coalesced computation.
pub const COALESCE_TIMEOUTS_TOTAL: &str = "heimdall_coalesce_timeouts_total";

/// Total retry attempts (not counting the initial attempt).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "heimdall_retries_total";

/// Total fast-path quota updates.
///
/// Labels: `status` ("ok" | "error").
pub const QUOTA_UPDATES_TOTAL: &str = "heimdall_quota_updates_total";

/// Total outbound provider requests.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const PROVIDER_REQUESTS_TOTAL: &str = "heimdall_provider_requests_total";

/// Outbound provider request duration in seconds.
///
/// Labels: `provider`.
pub const PROVIDER_REQUEST_DURATION_SECONDS: &str = "heimdall_provider_request_duration_seconds";
