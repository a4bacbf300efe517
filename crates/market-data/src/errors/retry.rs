/// Classification for retry policy.
///
/// Used by the [`RetryExecutor`](crate::registry::RetryExecutor) to decide
/// whether a failed provider call is attempted again.
///
/// # Behavior Summary
///
/// | Class | Retried? | Extra wait |
/// |-------|----------|------------|
/// | `Retryable` | Yes, with exponential backoff | No |
/// | `RateLimited` | Yes, with exponential backoff | Provider cooldown, when reported |
/// | `Fatal` | No | - |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Transient failure (network error, timeout). Retry with backoff.
    Retryable,

    /// The provider signaled throttling.
    ///
    /// Retried like `Retryable`, but the provider-reported cooldown takes
    /// precedence over the generic backoff schedule and is also pushed
    /// into the rate limiter so the next admission waits at least as long.
    RateLimited,

    /// Never retry within the same request: unknown symbol, bad credentials,
    /// invalid data, unsupported operation, or an open circuit.
    Fatal,
}
