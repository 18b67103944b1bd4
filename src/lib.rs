//! Tokengate - admission controller for outbound LLM provider APIs
//!
//! An in-process, in-memory budget tracker that decides, for every candidate
//! provider call, whether it may proceed now, must wait, or should be queued:
//!
//! - per-provider token buckets (tokens/minute) with continuous refill
//! - request-per-minute and daily-token windows, per provider and global
//! - concurrency ceilings, per provider and global
//! - reserve-then-reconcile accounting against actual usage
//! - exponential, provider-scoped backoff after rate-limit errors
//! - a priority-ordered, capacity- and timeout-bounded wait queue
//!
//! The HTTP client, token estimation, pricing, and error classification all
//! live with the caller; this crate only answers "may this call go out now,
//! and what does it cost us".

pub mod clock;
pub mod config;
pub mod limiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, GlobalLimits, GlobalLimitsPatch, LimiterConfig, ProviderLimits,
    ProviderLimitsPatch,
};
pub use limiter::{
    global, DenyReason, ErrorKind, GlobalStats, LimiterStats, ProviderStats, RateLimiter,
    UsageRecord, Verdict,
};
