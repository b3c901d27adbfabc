//! # Control-Plane Primitives
//!
//! Default thresholds and validation limits for the Meshwork core.
//!
//! These values are compiled in as defaults; every one of them can be
//! overridden through the app-level configuration.

use std::time::Duration;

// =============================================================================
// CIRCUIT BREAKER DEFAULTS
// =============================================================================

/// Consecutive failures that trip a breaker from CLOSED to OPEN.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an OPEN breaker waits before admitting a HALF_OPEN probe.
pub const DEFAULT_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// RATE LIMIT DEFAULTS
// =============================================================================

/// Length of the sliding rate-limit window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Requests allowed per `(client, route)` inside one window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// EVENT DEFAULTS
// =============================================================================

/// Maximum redeliveries recorded on a freshly built event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-handler processing deadline for a freshly built event.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a service name.
///
/// Names become route prefixes, redb keys and pub/sub channel suffixes,
/// so they are kept short and restricted to `[A-Za-z0-9._-]`.
pub const MAX_SERVICE_NAME_LENGTH: usize = 128;

/// Maximum length of an event type string.
pub const MAX_EVENT_TYPE_LENGTH: usize = 256;

/// HTTP methods accepted by routes and mesh calls.
pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Returns true if `method` is one of [`SUPPORTED_METHODS`] (case-insensitive).
#[must_use]
pub fn is_supported_method(method: &str) -> bool {
    SUPPORTED_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Returns true if `name` is a valid service name.
#[must_use]
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SERVICE_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
