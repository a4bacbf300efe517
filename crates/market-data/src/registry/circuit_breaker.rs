//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop calling a provider that is
//! known to be failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are rejected without a call.
//! - **HalfOpen**: A limited number of probe requests test recovery.
//!
//! Failures are counted over a sliding window, so a few failures spread over
//! a long period never open the circuit. State is in-memory and resets on
//! application restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::duration_ms;
use crate::models::ProviderId;

/// Default number of failures within the window before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default sliding window for counting failures.
const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Default time to stay Open before probing.
const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(300);

/// Default number of probe calls admitted while HalfOpen.
const DEFAULT_HALF_OPEN_MAX_PROBES: u32 = 3;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
    /// Testing recovery - limited requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `failure_window` that opens the circuit.
    pub failure_threshold: u32,
    /// Sliding window for counting failures.
    #[serde(rename = "failure_window_ms", with = "duration_ms")]
    pub failure_window: Duration,
    /// Time to stay Open before admitting probes.
    #[serde(rename = "open_duration_ms", with = "duration_ms")]
    pub open_duration: Duration,
    /// Probe calls admitted while HalfOpen.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            open_duration: DEFAULT_OPEN_DURATION,
            half_open_max_probes: DEFAULT_HALF_OPEN_MAX_PROBES,
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Recent failure timestamps, oldest first.
    failures: VecDeque<Instant>,
    /// Probes admitted since entering HalfOpen.
    probes_issued: u32,
    /// Time of the last state transition.
    transitioned_at: Option<Instant>,
}

impl Circuit {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            probes_issued: 0,
            transitioned_at: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > self.config.failure_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, state: CircuitState, now: Instant) {
        self.state = state;
        self.transitioned_at = Some(now);
        self.probes_issued = 0;
    }
}

/// Snapshot of one provider's circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    pub provider: String,
    pub state: CircuitState,
    /// Failures inside the current window.
    pub failure_count: u32,
    pub last_transition: Option<Instant>,
}

/// Per-provider circuit breaker.
///
/// Each provider's circuit sits behind its own mutex, so recording an
/// outcome for one provider never contends with another. Circuits are
/// created on demand with the default configuration unless configured
/// up front.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, Arc<Mutex<Circuit>>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker whose unconfigured providers use `config`.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Set the thresholds for one provider, starting from a Closed circuit.
    pub fn configure(&self, provider: &ProviderId, config: CircuitBreakerConfig) {
        let mut circuits = self.circuits.write().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        circuits.insert(
            provider.to_string(),
            Arc::new(Mutex::new(Circuit::new(config))),
        );
    }

    fn circuit(&self, provider: &ProviderId) -> Arc<Mutex<Circuit>> {
        {
            let circuits = self.circuits.read().unwrap_or_else(|poisoned| {
                warn!("Circuit breaker map lock was poisoned, recovering");
                poisoned.into_inner()
            });
            if let Some(circuit) = circuits.get(provider.as_ref()) {
                return Arc::clone(circuit);
            }
        }

        let mut circuits = self.circuits.write().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(
            circuits
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Circuit::new(self.default_config.clone())))),
        )
    }

    /// Lock a circuit, recovering from poison if necessary.
    ///
    /// For circuit breakers, it's safe to recover from a poisoned mutex since
    /// the worst case is slightly incorrect circuit state, which is better
    /// than panicking.
    fn lock(circuit: &Mutex<Circuit>) -> MutexGuard<'_, Circuit> {
        circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check if a request may be sent to a provider.
    ///
    /// An Open circuit whose open duration has elapsed moves to HalfOpen
    /// here. Every `true` returned while HalfOpen uses up one probe.
    pub fn allow(&self, provider: &ProviderId) -> bool {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = circuit.transitioned_at.unwrap_or(now);
                if now.duration_since(opened_at) >= circuit.config.open_duration {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        provider
                    );
                    circuit.transition(CircuitState::HalfOpen, now);
                    circuit.probes_issued = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probes_issued < circuit.config.half_open_max_probes {
                    circuit.probes_issued += 1;
                    debug!(
                        "Circuit breaker: probe {}/{} for '{}'",
                        circuit.probes_issued, circuit.config.half_open_max_probes, provider
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request for a provider.
    ///
    /// A success while HalfOpen closes the circuit and clears its failure
    /// history.
    pub fn record_success(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        let now = Instant::now();

        match circuit.state {
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful probe",
                    provider
                );
                circuit.transition(CircuitState::Closed, now);
                circuit.failures.clear();
            }
            CircuitState::Closed => {
                circuit.prune(now);
                debug!("Circuit breaker: success for '{}'", provider);
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(
                    "Circuit breaker: late success for '{}' ignored while Open",
                    provider
                );
            }
        }
    }

    /// Record a failed request for a provider.
    ///
    /// Opens the circuit once the failures inside the window reach the
    /// threshold. Any failure while HalfOpen reopens it and restarts the
    /// open-duration clock.
    pub fn record_failure(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        let now = Instant::now();

        circuit.failures.push_back(now);
        circuit.prune(now);

        match circuit.state {
            CircuitState::Closed => {
                let count = circuit.failures.len() as u32;
                if count >= circuit.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, count
                    );
                    circuit.transition(CircuitState::Open, now);
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, count, circuit.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failure in HalfOpen",
                    provider
                );
                circuit.transition(CircuitState::Open, now);
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
        }
    }

    /// Hand back a HalfOpen probe whose call ended without a verdict
    /// (deadline expiry, or an answer that says nothing about provider health).
    pub fn release_probe(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        if circuit.state == CircuitState::HalfOpen && circuit.probes_issued > 0 {
            circuit.probes_issued -= 1;
        }
    }

    /// Get the current state for a provider.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        let circuit = self.circuit(provider);
        let state = Self::lock(&circuit).state;
        state
    }

    /// Failures inside the provider's current window.
    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        circuit.prune(Instant::now());
        circuit.failures.len() as u32
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &ProviderId) {
        let circuit = self.circuit(provider);
        let mut circuit = Self::lock(&circuit);
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            provider
        );
        circuit.transition(CircuitState::Closed, Instant::now());
        circuit.failures.clear();
    }

    /// Get metrics for all tracked providers.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let circuits: Vec<(String, Arc<Mutex<Circuit>>)> = {
            let map = self.circuits.read().unwrap_or_else(|poisoned| {
                warn!("Circuit breaker map lock was poisoned, recovering");
                poisoned.into_inner()
            });
            map.iter()
                .map(|(name, circuit)| (name.clone(), Arc::clone(circuit)))
                .collect()
        };

        let now = Instant::now();
        circuits
            .into_iter()
            .map(|(provider, circuit)| {
                let mut circuit = Self::lock(&circuit);
                circuit.prune(now);
                CircuitMetrics {
                    provider,
                    state: circuit.state,
                    failure_count: circuit.failures.len() as u32,
                    last_transition: circuit.transitioned_at,
                }
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
