//! Session-long disabling of providers that keep rejecting credentials.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, warn};

use crate::models::ProviderId;

/// Default consecutive auth failures before a provider is disabled.
pub const DEFAULT_AUTH_DISABLE_THRESHOLD: u32 = 3;

#[derive(Debug)]
struct AuthState {
    threshold: u32,
    consecutive_failures: u32,
    disabled: bool,
}

impl AuthState {
    fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            disabled: false,
        }
    }
}

/// Tracks consecutive authentication failures per provider.
///
/// Once a provider reaches its threshold it stays disabled until
/// [`reset`](Self::reset) or process restart. Any successful call clears
/// the streak. Each provider's state has its own mutex, like the circuit
/// breaker's.
pub struct AuthGuard {
    states: RwLock<HashMap<String, Arc<Mutex<AuthState>>>>,
    thresholds: HashMap<String, u32>,
    default_threshold: u32,
}

impl AuthGuard {
    pub fn new() -> Self {
        Self::with_thresholds(HashMap::new())
    }

    /// Per-provider thresholds; unknown providers use the default.
    pub fn with_thresholds(thresholds: HashMap<String, u32>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            thresholds,
            default_threshold: DEFAULT_AUTH_DISABLE_THRESHOLD,
        }
    }

    fn existing(&self, provider: &ProviderId) -> Option<Arc<Mutex<AuthState>>> {
        let states = self.states.read().unwrap_or_else(|poisoned| {
            warn!("Auth guard map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        states.get(provider.as_ref()).cloned()
    }

    fn state(&self, provider: &ProviderId) -> Arc<Mutex<AuthState>> {
        if let Some(state) = self.existing(provider) {
            return state;
        }

        let threshold = self
            .thresholds
            .get(provider.as_ref())
            .copied()
            .unwrap_or(self.default_threshold);
        let mut states = self.states.write().unwrap_or_else(|poisoned| {
            warn!("Auth guard map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(
            states
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AuthState::new(threshold)))),
        )
    }

    fn lock(state: &Mutex<AuthState>) -> MutexGuard<'_, AuthState> {
        state.lock().unwrap_or_else(|poisoned| {
            warn!("Auth guard mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Record an auth failure. Returns true if this failure disabled the provider.
    pub fn record_auth_failure(&self, provider: &ProviderId) -> bool {
        let state = self.state(provider);
        let mut state = Self::lock(&state);

        if state.disabled {
            return false;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= state.threshold {
            state.disabled = true;
            warn!(
                "Provider '{}' disabled for this session after {} consecutive auth failures",
                provider, state.consecutive_failures
            );
            true
        } else {
            debug!(
                "Auth failure for '{}' ({}/{})",
                provider, state.consecutive_failures, state.threshold
            );
            false
        }
    }

    /// Clear the failure streak after a call that got past authentication.
    pub fn record_success(&self, provider: &ProviderId) {
        if let Some(state) = self.existing(provider) {
            let mut state = Self::lock(&state);
            if !state.disabled {
                state.consecutive_failures = 0;
            }
        }
    }

    pub fn is_disabled(&self, provider: &ProviderId) -> bool {
        match self.existing(provider) {
            Some(state) => {
                let disabled = Self::lock(&state).disabled;
                disabled
            }
            None => false,
        }
    }

    /// Re-enable a provider, e.g. after its credential was fixed.
    pub fn reset(&self, provider: &ProviderId) {
        if let Some(state) = self.existing(provider) {
            let mut state = Self::lock(&state);
            state.consecutive_failures = 0;
            state.disabled = false;
        }
    }
}

impl Default for AuthGuard {
    fn default() -> Self {
        Self::new()
    }
}
