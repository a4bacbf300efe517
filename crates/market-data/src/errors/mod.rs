//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the retry executor handles the error, and
/// [`counts_as_circuit_failure`](Self::counts_as_circuit_failure) decides whether
/// the provider's circuit breaker hears about it.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    /// The requested symbol was not recognized by the provider.
    /// The provider is skipped for this request only.
    #[error("Symbol not found: {0}")]
    NotFound(String),

    /// The provider rate limited the request (HTTP 429 or an in-body notice).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
        /// Cooldown reported by the provider, if any
        retry_after: Option<Duration>,
    },

    /// Credentials were rejected. Never retried.
    #[error("Authentication failed: {provider} - {message}")]
    Auth {
        /// The provider that rejected the credentials
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// A transport-level or server-side failure.
    #[error("Network error: {provider} - {message}")]
    Network {
        /// The provider being called
        provider: String,
        /// Description of the failure
        message: String,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The response parsed but failed validation (non-positive price,
    /// symbol mismatch, implausible values, unparsable body).
    #[error("Invalid data from {provider}: {message}")]
    DataInvalid {
        /// The provider that returned the data
        provider: String,
        /// Description of the validation failure
        message: String,
    },

    /// The circuit breaker is open for this provider. No call was made.
    #[error("Circuit open: {provider}")]
    CircuitOpen {
        /// The provider with an open circuit
        provider: String,
    },

    /// The provider was disabled for the session after repeated
    /// authentication failures. No call was made.
    #[error("Provider disabled: {provider}")]
    ProviderDisabled {
        /// The disabled provider
        provider: String,
    },

    /// The provider does not implement the requested operation.
    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported {
        /// The operation that was requested
        operation: String,
        /// The provider that doesn't support it
        provider: String,
    },

    /// The per-request deadline expired.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Every provider was tried (or skipped) and no stale cache entry exists.
    #[error("All providers exhausted for {symbol}: {attempts}")]
    AllProvidersExhausted {
        /// The requested symbol
        symbol: String,
        /// Summary of the attempts made
        attempts: String,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure in the persistent cache tier.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use stockpile_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::Timeout { provider: "YAHOO".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Retryable);
    ///
    /// let error = MarketDataError::NotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Fatal);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => RetryClass::Retryable,
            Self::RateLimited { .. } => RetryClass::RateLimited,
            Self::NotFound(_)
            | Self::Auth { .. }
            | Self::DataInvalid { .. }
            | Self::CircuitOpen { .. }
            | Self::ProviderDisabled { .. }
            | Self::NotSupported { .. }
            | Self::DeadlineExceeded
            | Self::AllProvidersExhausted { .. }
            | Self::Config(_)
            | Self::Cache(_) => RetryClass::Fatal,
        }
    }

    /// Whether this error, once it reaches the orchestrator, is recorded as a
    /// failure on the provider's circuit breaker.
    ///
    /// Rate limiting only reaches the orchestrator after the retry budget is
    /// spent, so a surfaced `RateLimited` is a repeated one and counts.
    pub fn counts_as_circuit_failure(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::DataInvalid { .. }
        )
    }

    /// Provider-reported cooldown, if this is a rate limit error that carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
