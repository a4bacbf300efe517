//! Sliding-window rate limiter for market data providers.
//!
//! Each provider gets its own window, guarded by its own mutex, enforcing
//! three rules at once:
//! - at most `max_per_window` call starts in any trailing `window`
//! - at most `burst_limit` call starts in any trailing `burst_window`
//! - at least `min_interval` between consecutive call starts
//!
//! A provider-reported cooldown (see [`RateLimiter::defer`]) is honored as a
//! fourth, temporary rule.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::duration_ms;
use crate::models::ProviderId;

/// Default rate limit: 60 requests per minute.
const DEFAULT_MAX_PER_WINDOW: u32 = 60;

/// Default burst allowance within one second.
const DEFAULT_BURST_LIMIT: u32 = 10;

/// Default spacing between consecutive calls.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum call starts within `window`. Zero disables the rule.
    pub max_per_window: u32,
    /// Length of the sliding window.
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    /// Maximum call starts within `burst_window`. Zero disables the rule.
    pub burst_limit: u32,
    /// Length of the burst window.
    #[serde(rename = "burst_window_ms", with = "duration_ms")]
    pub burst_window: Duration,
    /// Minimum spacing between consecutive call starts.
    #[serde(rename = "min_interval_ms", with = "duration_ms")]
    pub min_interval: Duration,
}

impl RateLimitConfig {
    /// A plain "N calls per window" limit without burst or spacing rules.
    pub fn per_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            burst_limit: 0,
            burst_window: Duration::ZERO,
            min_interval: Duration::ZERO,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            window: Duration::from_secs(60),
            burst_limit: DEFAULT_BURST_LIMIT,
            burst_window: Duration::from_secs(1),
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Call history for a single provider.
#[derive(Debug)]
struct Window {
    config: RateLimitConfig,
    /// Start times of recent calls, oldest first.
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
    /// Provider-reported cooldown.
    cooldown_until: Option<Instant>,
}

impl Window {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            calls: VecDeque::new(),
            last_call: None,
            cooldown_until: None,
        }
    }

    /// Drop timestamps that no rule can still see.
    fn prune(&mut self, now: Instant) {
        let horizon = self.config.window.max(self.config.burst_window);
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= horizon {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.cooldown_until.is_some_and(|until| until <= now) {
            self.cooldown_until = None;
        }
    }

    /// Time until a call may start, the maximum over all rules.
    fn wait_time(&mut self, now: Instant) -> Duration {
        self.prune(now);

        let window_wait = Self::rule_wait(
            &self.calls,
            now,
            self.config.window,
            self.config.max_per_window,
        );
        let burst_wait = Self::rule_wait(
            &self.calls,
            now,
            self.config.burst_window,
            self.config.burst_limit,
        );

        let spacing_wait = self
            .last_call
            .map(|last| (last + self.config.min_interval).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        let cooldown_wait = self
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        window_wait
            .max(burst_wait)
            .max(spacing_wait)
            .max(cooldown_wait)
    }

    /// Wait required so that fewer than `limit` calls remain inside the
    /// trailing `span`. A zero limit never waits.
    fn rule_wait(calls: &VecDeque<Instant>, now: Instant, span: Duration, limit: u32) -> Duration {
        if limit == 0 {
            return Duration::ZERO;
        }
        let limit = limit as usize;
        let in_span: Vec<&Instant> = calls
            .iter()
            .filter(|t| now.duration_since(**t) < span)
            .collect();

        if in_span.len() < limit {
            return Duration::ZERO;
        }

        // The call that has to age out before one more may start.
        let blocking = in_span[in_span.len() - limit];
        (*blocking + span).saturating_duration_since(now)
    }

    fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
        self.last_call = Some(now);
    }
}

/// Per-provider admission gate.
///
/// Thread-safe: the provider map is read-mostly and every provider's window
/// has its own mutex, so a busy provider never blocks callers of another.
/// Windows are created on demand with default settings, or can be
/// pre-configured with [`configure`](Self::configure).
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self::with_default(RateLimitConfig::default())
    }

    /// Create a rate limiter whose unconfigured providers use `config`.
    pub fn with_default(config: RateLimitConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Configure rate limits for a specific provider, discarding its history.
    pub fn configure(&self, provider: &ProviderId, config: RateLimitConfig) {
        let mut windows = self.windows.write().unwrap_or_else(|poisoned| {
            warn!("Rate limiter map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        windows.insert(
            provider.to_string(),
            Arc::new(Mutex::new(Window::new(config))),
        );
    }

    /// Get (or create) the window for a provider.
    fn window(&self, provider: &ProviderId) -> Arc<Mutex<Window>> {
        {
            let windows = self.windows.read().unwrap_or_else(|poisoned| {
                warn!("Rate limiter map lock was poisoned, recovering");
                poisoned.into_inner()
            });
            if let Some(window) = windows.get(provider.as_ref()) {
                return Arc::clone(window);
            }
        }

        let mut windows = self.windows.write().unwrap_or_else(|poisoned| {
            warn!("Rate limiter map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(
            windows
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Window::new(self.default_config.clone())))),
        )
    }

    /// Lock a provider window, recovering from poison if necessary.
    ///
    /// For rate limiting, it's safe to recover from a poisoned mutex since
    /// the worst case is slightly incorrect rate limiting, which is better
    /// than panicking.
    fn lock(window: &Mutex<Window>) -> MutexGuard<'_, Window> {
        window.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter window mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Wait until a call to the given provider is permitted, then record it.
    ///
    /// After every sleep the rules are checked again, so callers woken at
    /// the same time don't all start at once. Dropping the future while it
    /// waits records nothing.
    pub async fn acquire(&self, provider: &ProviderId) {
        let window = self.window(provider);
        loop {
            let wait_time = {
                let mut guard = Self::lock(&window);
                let now = Instant::now();
                let wait = guard.wait_time(now);
                if wait.is_zero() {
                    guard.record(now);
                    debug!("Rate limiter: admitted call to '{}'", provider);
                    return;
                }
                wait
            };

            debug!(
                "Rate limiter: waiting {:?} for provider '{}'",
                wait_time, provider
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Record a call if one is permitted right now.
    ///
    /// Returns true if the call was admitted, false if rate limited.
    pub fn try_acquire(&self, provider: &ProviderId) -> bool {
        let window = self.window(provider);
        let mut guard = Self::lock(&window);
        let now = Instant::now();
        if guard.wait_time(now).is_zero() {
            guard.record(now);
            true
        } else {
            false
        }
    }

    /// How long a call to the provider would have to wait right now.
    pub fn pending_wait(&self, provider: &ProviderId) -> Duration {
        let window = self.window(provider);
        let mut guard = Self::lock(&window);
        guard.wait_time(Instant::now())
    }

    /// Hold off all calls to the provider for at least `cooldown`.
    ///
    /// Used when the provider itself reports throttling; an existing longer
    /// cooldown is kept.
    pub fn defer(&self, provider: &ProviderId, cooldown: Duration) {
        let window = self.window(provider);
        let mut guard = Self::lock(&window);
        let until = Instant::now() + cooldown;
        if guard.cooldown_until.map_or(true, |current| current < until) {
            debug!(
                "Rate limiter: provider '{}' cooling down for {:?}",
                provider, cooldown
            );
            guard.cooldown_until = Some(until);
        }
    }

    /// Forget the call history of a provider, keeping its configuration.
    pub fn reset(&self, provider: &ProviderId) {
        let window = self.window(provider);
        let mut guard = Self::lock(&window);
        let config = guard.config.clone();
        *guard = Window::new(config);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn provider(name: &'static str) -> ProviderId {
        Cow::Borrowed(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_delays_calls_past_limit() {
        let limiter = RateLimiter::new();
        let p = provider("WINDOWED");
        limiter.configure(&p, RateLimitConfig::per_window(5, Duration::from_secs(60)));

        let start = Instant::now();
        let mut starts = Vec::new();
        for _ in 0..20 {
            limiter.acquire(&p).await;
            starts.push(start.elapsed());
        }

        // First five are immediate
        for s in &starts[..5] {
            assert!(*s < Duration::from_millis(1));
        }

        // Sixth waits for the first to leave the window
        assert!(starts[5] >= Duration::from_secs(60));
        assert!(starts[5] < Duration::from_secs(61));

        // No 60s span ever holds more than five starts
        for i in 5..starts.len() {
            assert!(starts[i] - starts[i - 5] >= Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_limit() {
        let limiter = RateLimiter::new();
        let p = provider("BURSTY");
        limiter.configure(
            &p,
            RateLimitConfig {
                max_per_window: 100,
                window: Duration::from_secs(60),
                burst_limit: 3,
                burst_window: Duration::from_secs(10),
                min_interval: Duration::ZERO,
            },
        );

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&p).await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire(&p).await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spacing() {
        let limiter = RateLimiter::new();
        let p = provider("SPACED");
        limiter.configure(
            &p,
            RateLimitConfig {
                max_per_window: 100,
                window: Duration::from_secs(60),
                burst_limit: 0,
                burst_window: Duration::ZERO,
                min_interval: Duration::from_secs(12),
            },
        );

        let start = Instant::now();
        limiter.acquire(&p).await;
        limiter.acquire(&p).await;
        limiter.acquire(&p).await;
        assert!(start.elapsed() >= Duration::from_secs(24));
        assert!(start.elapsed() < Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_extends_next_wait() {
        let limiter = RateLimiter::new();
        let p = provider("COOLING");
        limiter.configure(&p, RateLimitConfig::per_window(100, Duration::from_secs(60)));

        limiter.defer(&p, Duration::from_secs(30));
        assert!(limiter.pending_wait(&p) >= Duration::from_secs(29));

        let start = Instant::now();
        limiter.acquire(&p).await;
        assert!(start.elapsed() >= Duration::from_secs(30));

        // Cooldown is consumed
        assert_eq!(limiter.pending_wait(&p), Duration::ZERO);
    }

    #[test]
    fn test_try_acquire_respects_window() {
        let limiter = RateLimiter::new();
        let p = provider("CUSTOM_PROVIDER");
        limiter.configure(&p, RateLimitConfig::per_window(2, Duration::from_secs(60)));

        assert!(limiter.try_acquire(&p));
        assert!(limiter.try_acquire(&p));
        assert!(!limiter.try_acquire(&p));
    }

    #[test]
    fn test_zero_window_limit_is_unbounded() {
        let limiter = RateLimiter::new();
        let p = provider("UNLIMITED");
        limiter.configure(&p, RateLimitConfig::per_window(0, Duration::from_secs(60)));

        for _ in 0..10 {
            assert!(limiter.try_acquire(&p));
        }
        assert_eq!(limiter.pending_wait(&p), Duration::ZERO);
    }

    #[test]
    fn test_rate_limiter_per_provider_isolation() {
        let limiter = RateLimiter::new();
        let provider_a = provider("PROVIDER_A");
        let provider_b = provider("PROVIDER_B");
        limiter.configure(
            &provider_a,
            RateLimitConfig::per_window(1, Duration::from_secs(60)),
        );

        assert!(limiter.try_acquire(&provider_a));
        assert!(!limiter.try_acquire(&provider_a));

        // Provider B is unaffected
        assert!(limiter.try_acquire(&provider_b));
    }

    #[test]
    fn test_rate_limiter_reset() {
        let limiter = RateLimiter::new();
        let p = provider("RESET_PROVIDER");
        limiter.configure(&p, RateLimitConfig::per_window(1, Duration::from_secs(60)));

        assert!(limiter.try_acquire(&p));
        assert!(!limiter.try_acquire(&p));

        limiter.reset(&p);
        assert!(limiter.try_acquire(&p));
        assert!(!limiter.try_acquire(&p));
    }

    #[test]
    fn test_default_config_applies_to_unknown_provider() {
        let limiter = RateLimiter::new();
        let p = provider("UNCONFIGURED");

        assert!(limiter.try_acquire(&p));
        // Default spacing of 100ms blocks an immediate second call
        assert!(!limiter.try_acquire(&p));
    }
}
