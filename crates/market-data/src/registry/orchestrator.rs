//! Provider orchestration.
//!
//! The orchestrator walks the providers in priority order and returns the
//! first response that passes validation, recording why every provider
//! before it was rejected or skipped. For each provider it:
//! 1. Skips it if it was disabled after repeated auth failures
//! 2. Skips it if its circuit is open
//! 3. Waits for the rate limiter, calls the adapter, retries transient errors
//! 4. Validates the response
//! 5. Reports the outcome to the circuit breaker and auth guard
//!
//! With a race width of two or more, the top providers are called
//! concurrently. The highest-priority valid response still wins: a lower
//! provider's answer is only adopted once every provider above it has
//! failed. Racers that lose keep running in the background until they
//! finish or the deadline passes, so their outcomes still reach their own
//! breaker and limiter.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use super::{
    AuthGuard, CircuitBreaker, CircuitState, PayloadValidator, RateLimiter, RetryExecutor,
    RetryPolicy, ValidatorConfig,
};
use crate::config::ProviderDescriptor;
use crate::errors::MarketDataError;
use crate::models::{DataRequest, Payload, ProviderId, RejectReason, SelectionMetadata};
use crate::provider::ProviderClient;

/// A validated response and where it came from.
#[derive(Debug)]
pub struct Selected {
    pub payload: Payload,
    pub provider: ProviderId,
    pub selection: SelectionMetadata,
}

/// Health of one provider, as reported by [`ProviderOrchestrator::provider_status`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub priority: u32,
    pub circuit_state: CircuitState,
    /// Failures inside the breaker's current window.
    pub recent_failures: u32,
    /// Disabled for the session after repeated auth failures.
    pub disabled: bool,
}

#[derive(Clone)]
struct ProviderSlot {
    id: ProviderId,
    priority: u32,
    client: Arc<dyn ProviderClient>,
}

/// Shared per-provider protection state.
///
/// Lives behind an `Arc` so racing attempts can outlive the request that
/// started them.
struct Guards {
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    auth_guard: AuthGuard,
    retry: RetryExecutor,
    validator: PayloadValidator,
}

impl Guards {
    /// One provider attempt, from the skip checks to outcome recording.
    async fn attempt(
        &self,
        slot: &ProviderSlot,
        symbol: &str,
        request: DataRequest,
        deadline: Instant,
    ) -> Result<Payload, RejectReason> {
        self.try_attempt(slot, symbol, request, deadline)
            .await
            .map_err(|error| RejectReason::from_error(&error))
    }

    async fn try_attempt(
        &self,
        slot: &ProviderSlot,
        symbol: &str,
        request: DataRequest,
        deadline: Instant,
    ) -> Result<Payload, MarketDataError> {
        let id = &slot.id;

        if self.auth_guard.is_disabled(id) {
            debug!("Provider '{}' is disabled, skipping", id);
            return Err(MarketDataError::ProviderDisabled {
                provider: id.to_string(),
            });
        }

        if !self.circuit_breaker.allow(id) {
            debug!("Circuit breaker open for provider '{}', skipping", id);
            return Err(MarketDataError::CircuitOpen {
                provider: id.to_string(),
            });
        }

        debug!(
            "Fetching {} for {} from provider '{}'",
            request.operation(),
            symbol,
            id
        );

        let limiter = &self.rate_limiter;
        let client = &slot.client;
        let call = self.retry.run(id.as_ref(), move || async move {
            limiter.acquire(id).await;
            client.fetch(symbol, &request).await.map_err(|error| {
                if let Some(cooldown) = error.retry_after() {
                    limiter.defer(id, cooldown);
                }
                error
            })
        });

        let result = match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Deadline expired while fetching {} from '{}'", symbol, id);
                self.circuit_breaker.release_probe(id);
                return Err(MarketDataError::DeadlineExceeded);
            }
        };

        match result.and_then(|payload| self.validator.validate(id, symbol, payload)) {
            Ok(payload) => {
                self.circuit_breaker.record_success(id);
                self.auth_guard.record_success(id);
                Ok(payload)
            }
            Err(error) => {
                self.record_error(id, &error);
                Err(error)
            }
        }
    }

    fn record_error(&self, id: &ProviderId, error: &MarketDataError) {
        if error.counts_as_circuit_failure() {
            warn!("Provider '{}' failed: {}", id, error);
            self.circuit_breaker.record_failure(id);
        } else {
            info!("Provider '{}' rejected: {}", id, error);
            self.circuit_breaker.release_probe(id);
        }

        match error {
            MarketDataError::Auth { .. } => {
                self.auth_guard.record_auth_failure(id);
            }
            // The provider accepted our credentials
            MarketDataError::NotFound(_)
            | MarketDataError::NotSupported { .. }
            | MarketDataError::DataInvalid { .. } => self.auth_guard.record_success(id),
            _ => {}
        }
    }
}

/// Selects exactly one provider's answer per request.
pub struct ProviderOrchestrator {
    slots: Vec<ProviderSlot>,
    guards: Arc<Guards>,
}

impl ProviderOrchestrator {
    /// Build an orchestrator over `providers`, ordered by descriptor priority.
    ///
    /// Rate limits come from the descriptor when set, otherwise from the
    /// adapter's defaults.
    pub fn new(
        providers: Vec<(ProviderDescriptor, Arc<dyn ProviderClient>)>,
        retry: RetryPolicy,
        validator: ValidatorConfig,
    ) -> Self {
        let rate_limiter = RateLimiter::new();
        let circuit_breaker = CircuitBreaker::new();
        let mut auth_thresholds = HashMap::new();

        let mut slots: Vec<ProviderSlot> = providers
            .into_iter()
            .map(|(descriptor, client)| {
                let id = descriptor.id();
                let limits = descriptor
                    .rate_limit
                    .clone()
                    .unwrap_or_else(|| client.default_limits());

                rate_limiter.configure(&id, limits);
                circuit_breaker.configure(&id, descriptor.circuit_breaker.clone());
                auth_thresholds.insert(descriptor.name.clone(), descriptor.auth_disable_threshold);

                ProviderSlot {
                    id,
                    priority: descriptor.priority,
                    client,
                }
            })
            .collect();
        slots.sort_by_key(|slot| slot.priority);

        info!(
            "Provider order: {}",
            slots
                .iter()
                .map(|s| s.id.as_ref())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self {
            slots,
            guards: Arc::new(Guards {
                rate_limiter,
                circuit_breaker,
                auth_guard: AuthGuard::with_thresholds(auth_thresholds),
                retry: RetryExecutor::new(retry),
                validator: PayloadValidator::with_config(validator),
            }),
        }
    }

    /// Fetch `request` for `symbol`, trying providers until one answers
    /// with valid data or `deadline` passes.
    ///
    /// `race_top_k >= 2` calls that many top providers concurrently before
    /// falling back to the rest one at a time. On failure the returned
    /// metadata explains every provider's outcome.
    pub async fn fetch(
        &self,
        symbol: &str,
        request: DataRequest,
        deadline: Instant,
        race_top_k: usize,
    ) -> Result<Selected, SelectionMetadata> {
        let mut selection = SelectionMetadata::new();
        let mut next = 0;

        let width = race_top_k.min(self.slots.len());
        if width >= 2 {
            if let Some((payload, provider)) = self
                .race(&self.slots[..width], symbol, request, deadline, &mut selection)
                .await
            {
                return Ok(Selected {
                    payload,
                    provider,
                    selection,
                });
            }
            next = width;
        }

        for (position, slot) in self.slots.iter().enumerate().skip(next) {
            if Instant::now() >= deadline {
                self.mark_not_attempted(position, &mut selection);
                break;
            }

            match self.guards.attempt(slot, symbol, request, deadline).await {
                Ok(payload) => {
                    info!("Selected '{}' for {} {}", slot.id, request.operation(), symbol);
                    selection.record_accepted(slot.id.clone());
                    return Ok(Selected {
                        payload,
                        provider: slot.id.clone(),
                        selection,
                    });
                }
                Err(reason) => {
                    let expired = reason == RejectReason::DeadlineExceeded;
                    selection.record_rejection(slot.id.clone(), reason);
                    if expired {
                        self.mark_not_attempted(position + 1, &mut selection);
                        break;
                    }
                }
            }
        }

        warn!(
            "No provider produced {} for {}: {}",
            request.operation(),
            symbol,
            selection.summary()
        );
        Err(selection)
    }

    async fn race(
        &self,
        group: &[ProviderSlot],
        symbol: &str,
        request: DataRequest,
        deadline: Instant,
        selection: &mut SelectionMetadata,
    ) -> Option<(Payload, ProviderId)> {
        debug!("Racing {} providers for {}", group.len(), symbol);

        let mut in_flight: FuturesUnordered<_> = group
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let guards = Arc::clone(&self.guards);
                let slot = slot.clone();
                let symbol = symbol.to_string();
                let handle = tokio::spawn(async move {
                    guards.attempt(&slot, &symbol, request, deadline).await
                });
                async move { (index, handle.await) }
            })
            .collect();

        let mut results: Vec<Option<Result<Payload, RejectReason>>> =
            (0..group.len()).map(|_| None).collect();
        let mut next = 0;

        while let Some((index, joined)) = in_flight.next().await {
            results[index] = Some(joined.unwrap_or_else(|e| {
                warn!("Racing attempt for '{}' aborted: {}", group[index].id, e);
                Err(RejectReason::NetworkError)
            }));

            // Settle results in priority order; stop at the first racer still running
            while next < group.len() {
                match results[next].take() {
                    None => break,
                    Some(Ok(payload)) => {
                        let id = group[next].id.clone();
                        info!("Selected '{}' for {} {} (race)", id, request.operation(), symbol);
                        selection.record_accepted(id.clone());
                        return Some((payload, id));
                    }
                    Some(Err(reason)) => {
                        selection.record_rejection(group[next].id.clone(), reason);
                        next += 1;
                    }
                }
            }
        }

        None
    }

    fn mark_not_attempted(&self, from: usize, selection: &mut SelectionMetadata) {
        for slot in self.slots.iter().skip(from) {
            selection.record_rejection(slot.id.clone(), RejectReason::NotAttempted);
        }
    }

    /// Providers in the order they are tried.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.slots.iter().map(|s| s.id.clone()).collect()
    }

    /// Circuit and auth health of every provider.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.slots
            .iter()
            .map(|slot| ProviderStatus {
                provider: slot.id.to_string(),
                priority: slot.priority,
                circuit_state: self.guards.circuit_breaker.state(&slot.id),
                recent_failures: self.guards.circuit_breaker.failure_count(&slot.id),
                disabled: self.guards.auth_guard.is_disabled(&slot.id),
            })
            .collect()
    }

    /// Close the provider's circuit and re-enable it. Returns false for an
    /// unknown provider.
    pub fn reset_provider(&self, provider: &str) -> bool {
        let Some(slot) = self.slots.iter().find(|s| s.id.as_ref() == provider) else {
            return false;
        };
        self.guards.circuit_breaker.reset(&slot.id);
        self.guards.auth_guard.reset(&slot.id);
        true
    }
}
