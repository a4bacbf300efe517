//! Selection metadata: which providers were tried for a request and why
//! each one was accepted or rejected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::ProviderId;
use crate::errors::MarketDataError;

/// Why a provider's answer was not used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Circuit breaker is open; no call was made.
    CircuitOpen,

    /// Credentials rejected. `disabled` is set once the provider has been
    /// switched off for the session (no call was made in that case).
    AuthError { disabled: bool },

    /// Provider doesn't know the symbol.
    NotFound,

    /// Provider doesn't implement the operation.
    NotSupported,

    /// Still throttled after the retry budget was spent.
    RateLimited,

    /// Transport failure or timeout after the retry budget was spent.
    NetworkError,

    /// Response parsed but failed validation.
    DataInvalid { message: String },

    /// The request deadline expired while this provider was in flight.
    DeadlineExceeded,

    /// The request deadline expired before this provider was reached.
    NotAttempted,
}

impl RejectReason {
    /// Map a provider-call error to the reason recorded in the metadata.
    pub fn from_error(error: &MarketDataError) -> Self {
        match error {
            MarketDataError::CircuitOpen { .. } => Self::CircuitOpen,
            MarketDataError::ProviderDisabled { .. } => Self::AuthError { disabled: true },
            MarketDataError::Auth { .. } => Self::AuthError { disabled: false },
            MarketDataError::NotFound(_) => Self::NotFound,
            MarketDataError::NotSupported { .. } => Self::NotSupported,
            MarketDataError::RateLimited { .. } => Self::RateLimited,
            MarketDataError::Network { .. } | MarketDataError::Timeout { .. } => {
                Self::NetworkError
            }
            MarketDataError::DataInvalid { message, .. } => Self::DataInvalid {
                message: message.clone(),
            },
            MarketDataError::DeadlineExceeded => Self::DeadlineExceeded,
            other => Self::DataInvalid {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "CircuitOpen"),
            Self::AuthError { disabled: true } => write!(f, "AuthError(disabled)"),
            Self::AuthError { disabled: false } => write!(f, "AuthError"),
            Self::NotFound => write!(f, "NotFound"),
            Self::NotSupported => write!(f, "NotSupported"),
            Self::RateLimited => write!(f, "RateLimited"),
            Self::NetworkError => write!(f, "NetworkError"),
            Self::DataInvalid { message } => write!(f, "DataInvalid({})", message),
            Self::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            Self::NotAttempted => write!(f, "NotAttempted"),
        }
    }
}

/// Outcome of one provider within a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected(reason) => write!(f, "{}", reason),
        }
    }
}

/// Record of a single provider attempt during a fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: ProviderId,
    pub outcome: AttemptOutcome,
}

/// Provenance of a returned value.
///
/// References every provider that was consulted, but only the selected
/// provider ever contributes data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionMetadata {
    /// Providers in the order they were consulted
    pub attempts: Vec<ProviderAttempt>,

    /// Provider whose response was adopted
    pub selected: Option<ProviderId>,

    /// When the selection was made
    pub selected_at: DateTime<Utc>,

    /// Whether the value was served from the cache rather than a live call
    #[serde(default)]
    pub from_cache: bool,
}

impl SelectionMetadata {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
            selected: None,
            selected_at: Utc::now(),
            from_cache: false,
        }
    }

    pub fn record_rejection(&mut self, provider: ProviderId, reason: RejectReason) {
        self.attempts.push(ProviderAttempt {
            provider,
            outcome: AttemptOutcome::Rejected(reason),
        });
    }

    pub fn record_accepted(&mut self, provider: ProviderId) {
        self.attempts.push(ProviderAttempt {
            provider: provider.clone(),
            outcome: AttemptOutcome::Accepted,
        });
        self.selected = Some(provider);
        self.selected_at = Utc::now();
    }

    /// Outcome recorded for `provider`, if it was consulted.
    pub fn outcome_for(&self, provider: &str) -> Option<&AttemptOutcome> {
        self.attempts
            .iter()
            .find(|a| a.provider.as_ref() == provider)
            .map(|a| &a.outcome)
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers attempted".to_string();
        }
        self.attempts
            .iter()
            .map(|a| format!("{}: {}", a.provider, a.outcome))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::Accepted)
    }
}

impl Default for SelectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}
