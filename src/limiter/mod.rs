//! Outbound-API admission controller
//!
//! Gates every candidate call to an external LLM provider against
//! per-provider and global budgets: request/token rates, daily budgets,
//! concurrency ceilings, and exponential backoff after provider-reported
//! rate-limit errors. Callers `check` (or `reserve`) before calling out,
//! `release` with actual usage afterwards, and may park in a priority wait
//! queue when capacity is exhausted.
//!
//! All state is in-memory and process-local; a restart resets every counter.
//!
//! # Example
//!
//! ```
//! use tokengate::{LimiterConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(LimiterConfig::default());
//!
//! if limiter.reserve("anthropic", 1_500.0) {
//!     // ... call the provider ...
//!     limiter.release("anthropic", 1_420.0, 1_500.0, true, None);
//! }
//! ```

mod bucket;
mod journal;
mod queue;
mod stats;
mod verdict;

pub use journal::{ErrorKind, UsageRecord, DEFAULT_JOURNAL_CAPACITY};
pub use stats::{GlobalStats, LimiterStats, ProviderStats};
pub use verdict::{DenyReason, Verdict};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{ms_until_local_midnight, Clock, SystemClock, MINUTE_MS};
use crate::config::{GlobalLimits, LimiterConfig, ProviderLimits, ProviderLimitsPatch};

use bucket::{GlobalCounters, ProviderBucket};
use journal::{split_tokens, UsageJournal};
use queue::{WaitQueue, Waiter};

/// Fixed retry hint for concurrency denials, where no refill horizon exists.
const CONCURRENCY_RETRY_MS: u64 = 1_000;

/// Everything mutable lives behind one mutex: the controller is a single
/// critical-section domain, and every section is a short synchronous walk
/// over maps and counters. The lock is never held across an await.
struct State {
    limits: HashMap<String, ProviderLimits>,
    buckets: HashMap<String, ProviderBucket>,
    global: GlobalCounters,
    queue: WaitQueue,
    journal: UsageJournal,
}

/// Admission controller for outbound LLM provider calls.
///
/// Construct one per process (or use [`global()`]) and share it as an
/// `Arc`. [`start`](Self::start) spawns the periodic queue-drain task;
/// without it the queue still drains on every [`release`](Self::release).
pub struct RateLimiter {
    state: Mutex<State>,
    global_limits: GlobalLimits,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl RateLimiter {
    /// Create a limiter over the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter with an injected clock. Tests use this with
    /// [`ManualClock`](crate::clock::ManualClock) to make window math
    /// deterministic.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now_ms();
        Self {
            state: Mutex::new(State {
                limits: config.providers,
                buckets: HashMap::new(),
                global: GlobalCounters::new(now_ms),
                queue: WaitQueue::default(),
                journal: UsageJournal::default(),
            }),
            global_limits: config.global,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the periodic drain task. Returns its handle; [`stop`](Self::stop)
    /// cancels it.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval_ms = self.global_limits.drain_interval_ms;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms, "rate limiter drain loop started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("rate limiter drain loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        limiter.drain();
                    }
                }
            }
        })
    }

    /// Cancel the drain task and resolve every queued waiter with
    /// `rate_limiter_stopped`. The only teardown path; there is no
    /// persistence step.
    pub fn stop(&self) {
        self.cancel.cancel();

        let waiters = self.lock_state().queue.take_all();
        let flushed = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Verdict::deny(DenyReason::RateLimiterStopped, None));
        }

        metrics::gauge!("tokengate_queue_depth").set(0.0);
        if flushed > 0 {
            tracing::info!(flushed, "rate limiter stopped, queued waiters flushed");
        }
    }

    /// Admission check: may a call consuming `estimated_tokens` proceed now?
    ///
    /// Performs lazy refill as a side effect, then evaluates the denial
    /// ladder in order (first failing check wins). Consumes no capacity;
    /// pair with [`reserve`](Self::reserve) to actually take it.
    pub fn check(&self, provider: &str, estimated_tokens: f64) -> Verdict {
        let now_ms = self.clock.now_ms();
        let verdict = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            Self::evaluate(state, &self.global_limits, now_ms, provider, estimated_tokens)
        };
        if !verdict.allowed {
            Self::record_denial(provider, &verdict);
        }
        verdict
    }

    /// Check and, if allowed, consume capacity: debit the token bucket,
    /// count the request, and mark one call in flight. Returns false with no
    /// side effect when denied. The single lock acquisition makes the
    /// check-then-reserve pair atomic.
    pub fn reserve(&self, provider: &str, estimated_tokens: f64) -> bool {
        let estimated_tokens = estimated_tokens.max(0.0);
        let now_ms = self.clock.now_ms();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let verdict = Self::evaluate(state, &self.global_limits, now_ms, provider, estimated_tokens);
        if !verdict.allowed {
            drop(guard);
            Self::record_denial(provider, &verdict);
            return false;
        }

        if let Some(bucket) = state.buckets.get_mut(provider) {
            bucket.tokens -= estimated_tokens;
            bucket.requests_this_minute += 1;
            bucket.in_flight += 1;
        }
        state.global.total_in_flight += 1;
        state.global.tokens_this_minute += estimated_tokens;

        tracing::debug!(
            provider,
            estimated_tokens,
            in_flight = state.global.total_in_flight,
            "capacity reserved"
        );
        true
    }

    /// Reconcile a reservation against ground truth. Call exactly once per
    /// successful [`reserve`](Self::reserve), after the provider call
    /// completes either way.
    ///
    /// Refunds unused estimate (or deducts overshoot; the bucket may go
    /// negative and self-heals on the next refill), books `actual_tokens`
    /// against the daily budgets, releases the concurrency slots, updates
    /// backoff state, journals the outcome, and immediately drains the wait
    /// queue so freed capacity is offered to waiting callers.
    pub fn release(
        &self,
        provider: &str,
        actual_tokens: f64,
        estimated_tokens: f64,
        success: bool,
        error_kind: Option<ErrorKind>,
    ) {
        let actual_tokens = actual_tokens.max(0.0);
        let estimated_tokens = estimated_tokens.max(0.0);
        let now_ms = self.clock.now_ms();

        let resolutions = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            if let Some(limits) = state.limits.get(provider).cloned() {
                // A release is a use: create the bucket lazily so backoff
                // still lands for a provider seen here first.
                let bucket = state
                    .buckets
                    .entry(provider.to_string())
                    .or_insert_with(|| ProviderBucket::new(&limits, now_ms));

                bucket.refill(&limits, now_ms);
                bucket.tokens += estimated_tokens - actual_tokens;
                bucket.tokens_used_today += actual_tokens;
                bucket.in_flight = bucket.in_flight.saturating_sub(1);

                if success {
                    bucket.backoff_level = 0;
                    bucket.backoff_until_ms = 0;
                } else if error_kind == Some(ErrorKind::RateLimit) {
                    Self::apply_backoff(bucket, &limits, now_ms, provider);
                }
            }

            state.global.roll_windows(now_ms);
            state.global.tokens_today += actual_tokens;
            state.global.total_in_flight = state.global.total_in_flight.saturating_sub(1);

            let (input_tokens, output_tokens) = split_tokens(actual_tokens);
            state.journal.push(UsageRecord {
                request_id: uuid::Uuid::new_v4(),
                provider: provider.to_string(),
                input_tokens,
                output_tokens,
                timestamp_ms: now_ms,
                success,
                error_kind,
            });

            metrics::counter!(
                "tokengate_requests_completed_total",
                "provider" => provider.to_string(),
                "status" => if success { "ok" } else { "error" },
            )
            .increment(1);

            tracing::debug!(
                provider,
                actual_tokens,
                estimated_tokens,
                success,
                "reservation released"
            );

            self.drain_locked(state, now_ms)
        };

        Self::resolve(resolutions);
    }

    /// Wait for admission, up to the configured queue timeout.
    ///
    /// Fast path: an immediate check that passes returns without queueing.
    /// Otherwise the caller is parked in the priority queue (higher
    /// `priority` is served first; ties are FIFO) until a drain pass admits
    /// it, the queue is full (`queue_full`), the wait exceeds
    /// `request_timeout_ms` (`queue_timeout`), or the limiter stops.
    ///
    /// An allowed verdict grants admission only; the caller still calls
    /// [`reserve`](Self::reserve) before proceeding.
    pub async fn wait_for_capacity(
        &self,
        provider: &str,
        estimated_tokens: f64,
        priority: i32,
    ) -> Verdict {
        let (id, mut rx) = {
            let now_ms = self.clock.now_ms();
            let mut guard = self.lock_state();
            let state = &mut *guard;

            let verdict =
                Self::evaluate(state, &self.global_limits, now_ms, provider, estimated_tokens);
            if verdict.allowed {
                return verdict;
            }

            if state.queue.len() >= self.global_limits.request_queue_max_size {
                drop(guard);
                let verdict = Verdict::deny(DenyReason::QueueFull, None);
                Self::record_denial(provider, &verdict);
                return verdict;
            }

            let (id, rx) =
                state
                    .queue
                    .insert(provider.to_string(), estimated_tokens.max(0.0), priority, now_ms);
            let depth = state.queue.len();
            metrics::gauge!("tokengate_queue_depth").set(depth as f64);
            tracing::debug!(provider, priority, depth, "waiting for capacity");
            (id, rx)
        };

        let timeout = tokio::time::sleep(Duration::from_millis(self.global_limits.request_timeout_ms));
        tokio::pin!(timeout);

        tokio::select! {
            result = &mut rx => {
                result.unwrap_or_else(|_| Verdict::deny(DenyReason::RateLimiterStopped, None))
            }
            _ = &mut timeout => {
                // Lost the race only if a drain resolved us concurrently.
                let removed = self.lock_state().queue.remove(id);
                match removed {
                    Some(_) => {
                        let verdict = Verdict::deny(DenyReason::QueueTimeout, None);
                        Self::record_denial(provider, &verdict);
                        tracing::warn!(provider, "queued request timed out");
                        verdict
                    }
                    None => rx
                        .await
                        .unwrap_or_else(|_| Verdict::deny(DenyReason::RateLimiterStopped, None)),
                }
            }
        }
    }

    /// Run one drain pass now. [`start`](Self::start) calls this on the
    /// periodic tick; [`release`](Self::release) after every reconciliation.
    pub fn drain(&self) {
        let resolutions = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            self.drain_locked(state, self.clock.now_ms())
        };
        Self::resolve(resolutions);
    }

    /// Snapshot every known provider's bucket and the global counters.
    pub fn stats(&self) -> LimiterStats {
        let now_ms = self.clock.now_ms();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        state.global.roll_windows(now_ms);

        let mut providers = HashMap::new();
        for (name, bucket) in &mut state.buckets {
            let Some(limits) = state.limits.get(name) else {
                continue;
            };
            bucket.refill(limits, now_ms);

            let daily_usage_percent = if limits.tokens_per_day > 0.0 {
                bucket.tokens_used_today / limits.tokens_per_day * 100.0
            } else {
                0.0
            };

            providers.insert(
                name.clone(),
                ProviderStats {
                    enabled: limits.enabled,
                    tokens_available: bucket.tokens,
                    tokens_used_today: bucket.tokens_used_today,
                    requests_this_minute: bucket.requests_this_minute,
                    in_flight: bucket.in_flight,
                    backoff_level: bucket.backoff_level,
                    backoff_until_ms: bucket.backoff_until_ms,
                    daily_usage_percent,
                },
            );
        }

        LimiterStats {
            providers,
            global: GlobalStats {
                tokens_this_minute: state.global.tokens_this_minute,
                tokens_today: state.global.tokens_today,
                total_in_flight: state.global.total_in_flight,
                queue_depth: state.queue.len(),
            },
        }
    }

    /// Most recent `limit` usage records, oldest first.
    pub fn usage_history(&self, limit: usize) -> Vec<UsageRecord> {
        self.lock_state().journal.recent(limit)
    }

    /// Number of waiters currently queued.
    pub fn queue_depth(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Provider identifiers with configured limits, sorted.
    pub fn known_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.lock_state().limits.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Merge a partial limits override at runtime. Unknown providers get a
    /// limits entry built from the generic fallback defaults, so new vendors
    /// can be onboarded without a restart.
    pub fn update_provider_limits(&self, provider: &str, patch: &ProviderLimitsPatch) {
        let mut guard = self.lock_state();
        guard
            .limits
            .entry(provider.to_string())
            .or_default()
            .apply(patch);
        drop(guard);
        tracing::info!(provider, "provider limits updated");
    }

    /// Enable or disable a provider without touching its other limits.
    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) {
        self.update_provider_limits(
            provider,
            &ProviderLimitsPatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The denial ladder. First failing check wins; each rung has a distinct
    /// reason so callers can react differently. Refill happens before
    /// evaluation, so the verdict reflects capacity as of `now_ms`.
    fn evaluate(
        state: &mut State,
        global_limits: &GlobalLimits,
        now_ms: u64,
        provider: &str,
        estimated_tokens: f64,
    ) -> Verdict {
        let estimated_tokens = estimated_tokens.max(0.0);

        // Unknown providers carry no limits and are always admitted.
        let Some(limits) = state.limits.get(provider).cloned() else {
            return Verdict::allow_unlimited();
        };

        if !limits.enabled {
            return Verdict::deny(DenyReason::ProviderDisabled, None);
        }

        let bucket = state
            .buckets
            .entry(provider.to_string())
            .or_insert_with(|| ProviderBucket::new(&limits, now_ms));
        bucket.refill(&limits, now_ms);
        state.global.roll_windows(now_ms);

        if bucket.in_backoff(now_ms) {
            return Verdict::deny(
                DenyReason::BackoffActive,
                Some(bucket.backoff_until_ms - now_ms),
            );
        }

        if bucket.in_flight >= limits.max_concurrent {
            return Verdict::deny(DenyReason::MaxConcurrentReached, Some(CONCURRENCY_RETRY_MS));
        }

        if state.global.total_in_flight >= global_limits.max_concurrent_total {
            return Verdict::deny(
                DenyReason::GlobalMaxConcurrentReached,
                Some(CONCURRENCY_RETRY_MS),
            );
        }

        if bucket.requests_this_minute >= limits.requests_per_minute {
            let elapsed = now_ms.saturating_sub(bucket.minute_window_start_ms);
            let wait = MINUTE_MS.saturating_sub(elapsed).max(CONCURRENCY_RETRY_MS);
            return Verdict::deny(DenyReason::RpmExceeded, Some(wait));
        }

        if bucket.tokens < estimated_tokens {
            let rate_per_ms = limits.tokens_per_minute / MINUTE_MS as f64;
            let wait = if rate_per_ms > 0.0 {
                (((estimated_tokens - bucket.tokens) / rate_per_ms).ceil() as u64).min(MINUTE_MS)
            } else {
                MINUTE_MS
            };
            return Verdict::deny(DenyReason::TpmExceeded, Some(wait));
        }

        if bucket.tokens_used_today + estimated_tokens > limits.tokens_per_day {
            return Verdict::deny(
                DenyReason::DailyLimitExceeded,
                Some(ms_until_local_midnight(now_ms)),
            );
        }

        if state.global.tokens_this_minute + estimated_tokens > global_limits.tokens_per_minute {
            let elapsed = now_ms.saturating_sub(state.global.minute_window_start_ms);
            let wait = MINUTE_MS.saturating_sub(elapsed).max(CONCURRENCY_RETRY_MS);
            return Verdict::deny(DenyReason::GlobalTpmExceeded, Some(wait));
        }

        if state.global.tokens_today + estimated_tokens > global_limits.tokens_per_day {
            return Verdict::deny(
                DenyReason::GlobalDailyLimitExceeded,
                Some(ms_until_local_midnight(now_ms)),
            );
        }

        Verdict::allow(
            (bucket.tokens - estimated_tokens).floor() as i64,
            limits
                .requests_per_minute
                .saturating_sub(bucket.requests_this_minute + 1),
        )
    }

    /// Escalate the provider's cooldown: `base * 2^(level-1)`, capped at
    /// `backoff_max_ms`. Provider-scoped, never global.
    fn apply_backoff(
        bucket: &mut ProviderBucket,
        limits: &ProviderLimits,
        now_ms: u64,
        provider: &str,
    ) {
        bucket.backoff_level += 1;
        let exponent = bucket.backoff_level.saturating_sub(1).min(32);
        let delay_ms = limits
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(limits.backoff_max_ms);
        bucket.backoff_until_ms = now_ms + delay_ms;

        tracing::warn!(
            provider,
            level = bucket.backoff_level,
            delay_ms,
            "provider backoff escalated"
        );
        metrics::counter!("tokengate_backoff_events_total", "provider" => provider.to_string())
            .increment(1);
    }

    /// One pass over the queue in priority order: admit whoever now passes,
    /// expire whoever aged out, keep the rest. A stalled entry never blocks
    /// the ones behind it.
    fn drain_locked(&self, state: &mut State, now_ms: u64) -> Vec<(Waiter, Verdict)> {
        if state.queue.is_empty() {
            return Vec::new();
        }

        let timeout_ms = self.global_limits.request_timeout_ms;
        let mut resolved = Vec::new();
        let mut kept = Vec::new();

        for waiter in state.queue.take_all() {
            if now_ms.saturating_sub(waiter.enqueued_at_ms) >= timeout_ms {
                resolved.push((waiter, Verdict::deny(DenyReason::QueueTimeout, None)));
                continue;
            }

            let verdict = Self::evaluate(
                state,
                &self.global_limits,
                now_ms,
                &waiter.provider,
                waiter.estimated_tokens,
            );
            if verdict.allowed {
                resolved.push((waiter, verdict));
            } else {
                kept.push(waiter);
            }
        }

        state.queue.restore(kept);
        metrics::gauge!("tokengate_queue_depth").set(state.queue.len() as f64);
        resolved
    }

    /// Complete drained waiters outside the lock. A send can fail only when
    /// the waiter already timed out on its own timer; that is fine.
    fn resolve(resolutions: Vec<(Waiter, Verdict)>) {
        for (waiter, verdict) in resolutions {
            if verdict.reason == Some(DenyReason::QueueTimeout) {
                tracing::warn!(provider = %waiter.provider, "queued request expired during drain");
                Self::record_denial(&waiter.provider, &verdict);
            } else {
                tracing::debug!(provider = %waiter.provider, "queued request admitted");
            }
            let _ = waiter.tx.send(verdict);
        }
    }

    fn record_denial(provider: &str, verdict: &Verdict) {
        if let Some(reason) = verdict.reason {
            tracing::debug!(provider, %reason, wait_ms = verdict.wait_ms, "admission denied");
            metrics::counter!("tokengate_denials_total", "reason" => reason.to_string())
                .increment(1);
        }
    }
}

/// Process-wide limiter over the built-in defaults, for embedders that do
/// not thread a handle through their call graph. The drain task is not
/// started; call [`RateLimiter::start`] from a runtime if pure-timeout
/// expiry of an idle queue matters. Prefer constructing and injecting an
/// explicit instance.
pub fn global() -> Arc<RateLimiter> {
    static GLOBAL: OnceLock<Arc<RateLimiter>> = OnceLock::new();
    GLOBAL
        .get_or_init(|| Arc::new(RateLimiter::new(LimiterConfig::default())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, DAY_MS};

    fn test_limits() -> ProviderLimits {
        ProviderLimits {
            requests_per_minute: 10,
            tokens_per_minute: 1_000.0,
            tokens_per_day: 100_000.0,
            max_concurrent: 4,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            enabled: true,
        }
    }

    fn config_with(provider: &str, limits: ProviderLimits) -> LimiterConfig {
        let mut config = LimiterConfig::default();
        config.providers.clear();
        config.providers.insert(provider.to_string(), limits);
        config
    }

    fn limiter(limits: ProviderLimits) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(config_with("anthropic", limits), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn unknown_provider_is_always_allowed() {
        let (limiter, _clock) = limiter(test_limits());
        let verdict = limiter.check("acme-llm", 1_000_000.0);
        assert!(verdict.allowed);
        assert!(verdict.tokens_remaining.is_none());
        assert!(limiter.reserve("acme-llm", 1_000_000.0));
    }

    #[test]
    fn disabled_provider_is_denied() {
        let (limiter, _clock) = limiter(ProviderLimits {
            enabled: false,
            ..test_limits()
        });
        let verdict = limiter.check("anthropic", 1.0);
        assert_eq!(verdict.reason, Some(DenyReason::ProviderDisabled));
        assert!(verdict.wait_ms.is_none());
    }

    #[test]
    fn rpm_window_scenario() {
        let (limiter, clock) = limiter(ProviderLimits {
            requests_per_minute: 2,
            tokens_per_minute: 1_000.0,
            ..test_limits()
        });

        assert!(limiter.reserve("anthropic", 400.0));
        assert!(limiter.reserve("anthropic", 400.0));

        let verdict = limiter.check("anthropic", 1.0);
        assert_eq!(verdict.reason, Some(DenyReason::RpmExceeded));
        assert!(verdict.wait_ms.unwrap() <= MINUTE_MS);

        // A full idle minute resets the request window and refills the bucket.
        clock.advance(61_000);
        let verdict = limiter.check("anthropic", 1_000.0);
        assert!(verdict.allowed);
        assert_eq!(verdict.tokens_remaining, Some(0));
        assert_eq!(verdict.requests_remaining, Some(1));
    }

    #[test]
    fn tpm_denial_carries_refill_wait_hint() {
        let (limiter, _clock) = limiter(test_limits());
        assert!(limiter.reserve("anthropic", 900.0));

        let verdict = limiter.check("anthropic", 200.0);
        assert_eq!(verdict.reason, Some(DenyReason::TpmExceeded));
        // Deficit of 100 tokens at 1000/min refills in ~6 seconds (the hint
        // rounds up, so float division may land one ms over).
        let wait = verdict.wait_ms.unwrap();
        assert!((6_000..=6_001).contains(&wait), "wait hint was {wait}");
    }

    #[test]
    fn provider_concurrency_ceiling() {
        let (limiter, _clock) = limiter(ProviderLimits {
            max_concurrent: 1,
            ..test_limits()
        });

        assert!(limiter.reserve("anthropic", 10.0));
        let verdict = limiter.check("anthropic", 10.0);
        assert_eq!(verdict.reason, Some(DenyReason::MaxConcurrentReached));
        assert_eq!(verdict.wait_ms, Some(1_000));

        limiter.release("anthropic", 10.0, 10.0, true, None);
        assert!(limiter.check("anthropic", 10.0).allowed);
    }

    #[test]
    fn global_concurrency_ceiling_spans_providers() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let mut config = config_with("anthropic", test_limits());
        config
            .providers
            .insert("openai".to_string(), test_limits());
        config.global.max_concurrent_total = 1;
        let limiter = RateLimiter::with_clock(config, clock);

        assert!(limiter.reserve("anthropic", 10.0));
        let verdict = limiter.check("openai", 10.0);
        assert_eq!(verdict.reason, Some(DenyReason::GlobalMaxConcurrentReached));
    }

    #[test]
    fn provider_daily_budget() {
        let (limiter, _clock) = limiter(ProviderLimits {
            tokens_per_day: 500.0,
            ..test_limits()
        });

        assert!(limiter.reserve("anthropic", 400.0));
        limiter.release("anthropic", 400.0, 400.0, true, None);

        let verdict = limiter.check("anthropic", 200.0);
        assert_eq!(verdict.reason, Some(DenyReason::DailyLimitExceeded));
        assert!(verdict.wait_ms.unwrap() <= DAY_MS);
    }

    #[test]
    fn global_minute_and_daily_budgets() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let mut config = config_with(
            "anthropic",
            ProviderLimits {
                tokens_per_minute: 100_000.0,
                tokens_per_day: 1_000_000.0,
                ..test_limits()
            },
        );
        config.global.tokens_per_minute = 1_000.0;
        config.global.tokens_per_day = 1_500.0;
        let limiter = RateLimiter::with_clock(config, clock.clone());

        assert!(limiter.reserve("anthropic", 900.0));
        let verdict = limiter.check("anthropic", 200.0);
        assert_eq!(verdict.reason, Some(DenyReason::GlobalTpmExceeded));

        // Complete the call, roll into the next minute: the daily aggregate
        // is now the binding constraint.
        limiter.release("anthropic", 900.0, 900.0, true, None);
        clock.advance(MINUTE_MS);
        let verdict = limiter.check("anthropic", 700.0);
        assert_eq!(verdict.reason, Some(DenyReason::GlobalDailyLimitExceeded));
    }

    #[test]
    fn release_reconciles_overshoot_and_escalates_backoff() {
        let (limiter, clock) = limiter(test_limits());
        let start = clock.now_ms();

        assert!(limiter.reserve("anthropic", 400.0));
        limiter.release(
            "anthropic",
            450.0,
            400.0,
            false,
            Some(ErrorKind::RateLimit),
        );

        let stats = limiter.stats();
        let provider = &stats.providers["anthropic"];
        // 1000 - 400 reserved, then 400 - 450 reconciled: 550 left.
        assert!((provider.tokens_available - 550.0).abs() < 1e-6);
        assert_eq!(provider.backoff_level, 1);
        assert_eq!(provider.backoff_until_ms, start + 1_000);

        let verdict = limiter.check("anthropic", 1.0);
        assert_eq!(verdict.reason, Some(DenyReason::BackoffActive));
        assert_eq!(verdict.wait_ms, Some(1_000));
    }

    #[test]
    fn backoff_gaps_grow_to_cap_and_reset_on_success() {
        let (limiter, clock) = limiter(test_limits());

        let mut gaps = Vec::new();
        for _ in 0..6 {
            limiter.release("anthropic", 0.0, 0.0, false, Some(ErrorKind::RateLimit));
            let stats = limiter.stats();
            gaps.push(stats.providers["anthropic"].backoff_until_ms - clock.now_ms());
        }

        // 1s, 2s, 4s, 8s, then clamped at backoff_max_ms.
        assert_eq!(gaps, vec![1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);

        limiter.release("anthropic", 0.0, 0.0, true, None);
        let stats = limiter.stats();
        assert_eq!(stats.providers["anthropic"].backoff_level, 0);
        assert_eq!(stats.providers["anthropic"].backoff_until_ms, 0);
    }

    #[test]
    fn non_rate_limit_failures_do_not_backoff() {
        let (limiter, _clock) = limiter(test_limits());
        assert!(limiter.reserve("anthropic", 10.0));
        limiter.release("anthropic", 10.0, 10.0, false, Some(ErrorKind::Timeout));

        let stats = limiter.stats();
        assert_eq!(stats.providers["anthropic"].backoff_level, 0);
        assert!(limiter.check("anthropic", 10.0).allowed);

        let history = limiter.usage_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn negative_balance_blocks_then_self_heals() {
        let (limiter, clock) = limiter(test_limits());

        assert!(limiter.reserve("anthropic", 100.0));
        // Usage wildly exceeded the estimate: the bucket goes negative.
        limiter.release("anthropic", 1_200.0, 100.0, true, None);
        let stats = limiter.stats();
        assert!(stats.providers["anthropic"].tokens_available < 0.0);

        let verdict = limiter.check("anthropic", 1.0);
        assert_eq!(verdict.reason, Some(DenyReason::TpmExceeded));

        // Refill accrues over the deficit without any clamping.
        clock.advance(MINUTE_MS);
        assert!(limiter.check("anthropic", 700.0).allowed);
    }

    #[test]
    fn stats_report_daily_usage_percent() {
        let (limiter, _clock) = limiter(ProviderLimits {
            tokens_per_day: 10_000.0,
            ..test_limits()
        });

        assert!(limiter.reserve("anthropic", 500.0));
        limiter.release("anthropic", 500.0, 500.0, true, None);

        let stats = limiter.stats();
        let provider = &stats.providers["anthropic"];
        assert!((provider.daily_usage_percent - 5.0).abs() < 1e-6);
        assert_eq!(stats.global.total_in_flight, 0);
        assert!((stats.global.tokens_today - 500.0).abs() < 1e-6);
    }

    #[test]
    fn runtime_reconfiguration() {
        let (limiter, _clock) = limiter(test_limits());

        limiter.set_provider_enabled("anthropic", false);
        assert_eq!(
            limiter.check("anthropic", 1.0).reason,
            Some(DenyReason::ProviderDisabled)
        );

        limiter.set_provider_enabled("anthropic", true);
        assert!(limiter.check("anthropic", 1.0).allowed);

        // Onboard a brand-new provider at runtime.
        limiter.update_provider_limits(
            "acme-llm",
            &ProviderLimitsPatch {
                requests_per_minute: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(
            limiter.check("acme-llm", 1.0).reason,
            Some(DenyReason::RpmExceeded)
        );
        assert!(limiter.known_providers().contains(&"acme-llm".to_string()));
    }

    #[test]
    fn journal_records_split_and_order() {
        let (limiter, _clock) = limiter(test_limits());

        for n in 0..3 {
            assert!(limiter.reserve("anthropic", 100.0));
            limiter.release("anthropic", 100.0 * (n + 1) as f64, 100.0, true, None);
        }

        let history = limiter.usage_history(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].input_tokens + history[0].output_tokens, 200);
        assert_eq!(history[1].input_tokens + history[1].output_tokens, 300);
        assert_eq!(history[1].input_tokens, 210);
    }

    #[test]
    fn global_singleton_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
