//! Provider registry module.
//!
//! This module provides orchestration for market data providers, including:
//! - Provider priority ordering and fallback
//! - Rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Session-long disabling on repeated auth failures
//! - Retry with exponential backoff and jitter
//! - Response validation

mod auth_guard;
mod circuit_breaker;
mod orchestrator;
mod rate_limiter;
mod retry;
mod validator;

pub use auth_guard::{AuthGuard, DEFAULT_AUTH_DISABLE_THRESHOLD};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use orchestrator::{ProviderOrchestrator, ProviderStatus, Selected};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryExecutor, RetryPolicy};
pub use validator::{PayloadValidator, ValidatorConfig};
