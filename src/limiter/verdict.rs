//! Admission verdicts
//!
//! Every admission outcome is a typed verdict, never an error: callers decide
//! whether a denial is fatal, retryable, or queueable.

use serde::{Deserialize, Serialize};

/// Why an admission check denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Provider is administratively disabled.
    ProviderDisabled,
    /// Provider is inside an exponential-backoff cooldown window.
    BackoffActive,
    /// Provider already has `max_concurrent` calls in flight.
    MaxConcurrentReached,
    /// The process-wide concurrency ceiling is reached.
    GlobalMaxConcurrentReached,
    /// Provider request-per-minute window is exhausted.
    RpmExceeded,
    /// Provider token bucket cannot cover the estimate.
    TpmExceeded,
    /// Provider daily token budget would be exceeded.
    DailyLimitExceeded,
    /// Aggregate per-minute token budget would be exceeded.
    GlobalTpmExceeded,
    /// Aggregate daily token budget would be exceeded.
    GlobalDailyLimitExceeded,
    /// The wait queue is at capacity.
    QueueFull,
    /// The waiter aged out of the queue.
    QueueTimeout,
    /// The limiter was stopped while the waiter was queued.
    RateLimiterStopped,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::ProviderDisabled => "provider_disabled",
            DenyReason::BackoffActive => "backoff_active",
            DenyReason::MaxConcurrentReached => "max_concurrent_reached",
            DenyReason::GlobalMaxConcurrentReached => "global_max_concurrent_reached",
            DenyReason::RpmExceeded => "rpm_exceeded",
            DenyReason::TpmExceeded => "tpm_exceeded",
            DenyReason::DailyLimitExceeded => "daily_limit_exceeded",
            DenyReason::GlobalTpmExceeded => "global_tpm_exceeded",
            DenyReason::GlobalDailyLimitExceeded => "global_daily_limit_exceeded",
            DenyReason::QueueFull => "queue_full",
            DenyReason::QueueTimeout => "queue_timeout",
            DenyReason::RateLimiterStopped => "rate_limiter_stopped",
        };
        f.write_str(s)
    }
}

/// Outcome of an admission check.
///
/// Denials carry a [`DenyReason`] and, where one can be computed, a `wait_ms`
/// retry hint. Allowed verdicts carry remaining-capacity hints for
/// observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the call may proceed now.
    pub allowed: bool,

    /// Denial reason, present only when `allowed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,

    /// Suggested wait before retrying, when the denial has a known horizon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,

    /// Provider tokens left after this call would be admitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_remaining: Option<i64>,

    /// Provider requests left in the current minute window after this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_remaining: Option<u32>,
}

impl Verdict {
    /// Allowed, for a provider with no configured limits.
    pub fn allow_unlimited() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_ms: None,
            tokens_remaining: None,
            requests_remaining: None,
        }
    }

    /// Allowed, with remaining-capacity hints.
    pub fn allow(tokens_remaining: i64, requests_remaining: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_ms: None,
            tokens_remaining: Some(tokens_remaining),
            requests_remaining: Some(requests_remaining),
        }
    }

    /// Denied for `reason`, optionally with a retry hint.
    pub fn deny(reason: DenyReason, wait_ms: Option<u64>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait_ms,
            tokens_remaining: None,
            requests_remaining: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_serialize_snake_case() {
        let json = serde_json::to_string(&DenyReason::GlobalTpmExceeded).unwrap();
        assert_eq!(json, "\"global_tpm_exceeded\"");
        assert_eq!(DenyReason::RateLimiterStopped.to_string(), "rate_limiter_stopped");
    }

    #[test]
    fn denied_verdict_skips_capacity_hints() {
        let verdict = Verdict::deny(DenyReason::RpmExceeded, Some(1_000));
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("rpm_exceeded"));
        assert!(!json.contains("tokens_remaining"));
    }

    #[test]
    fn allowed_verdict_carries_hints() {
        let verdict = Verdict::allow(600, 49);
        assert!(verdict.allowed);
        assert_eq!(verdict.tokens_remaining, Some(600));
        assert_eq!(verdict.requests_remaining, Some(49));
        assert!(verdict.wait_ms.is_none());
    }
}
