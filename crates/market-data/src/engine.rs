//! The market data engine.
//!
//! `Engine` is the one object callers hold. Every read goes through the same
//! pipeline:
//!
//! ```text
//! normalize symbol -> fresh cache? -> orchestrator -> cache put
//!                                          |
//!                                   all providers failed
//!                                          v
//!                          stale cache entry or AllProvidersExhausted
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::cache::{CacheKey, CacheStore};
use crate::config::EngineConfig;
use crate::errors::MarketDataError;
use crate::models::{
    normalize_symbol, Bar, DataRequest, FetchOptions, IntradayInterval, MarketSnapshot, Payload,
    ProviderId, RawOverview, RawQuote, RawSeries, SelectionMetadata, Sourced, TimeRange,
};
use crate::provider::{self, ProviderClient};
use crate::registry::{ProviderOrchestrator, ProviderStatus};

/// Multi-provider market data engine.
///
/// Safe to share between tasks; wrap it in an `Arc`.
pub struct Engine {
    config: EngineConfig,
    orchestrator: ProviderOrchestrator,
    cache: CacheStore,
}

impl Engine {
    /// Build an engine from configuration and ready-made clients.
    ///
    /// Every configured provider needs a client with a matching `id()`.
    pub fn new(
        config: EngineConfig,
        clients: Vec<Arc<dyn ProviderClient>>,
    ) -> Result<Self, MarketDataError> {
        config.validate()?;

        let mut by_id: HashMap<&'static str, Arc<dyn ProviderClient>> =
            clients.into_iter().map(|c| (c.id(), c)).collect();

        let mut providers = Vec::with_capacity(config.providers.len());
        for descriptor in config.providers_by_priority() {
            let client = by_id.remove(descriptor.name.as_str()).ok_or_else(|| {
                MarketDataError::Config(format!("No client for provider {}", descriptor.name))
            })?;
            providers.push((descriptor, client));
        }

        for unused in by_id.keys() {
            warn!("Client '{}' has no provider descriptor and will not be used", unused);
        }

        let orchestrator =
            ProviderOrchestrator::new(providers, config.retry.clone(), config.validator.clone());
        let cache = CacheStore::new(
            config.cache_dir.clone(),
            config.ttl.clone(),
            config.stale_retention,
        );

        Ok(Self {
            config,
            orchestrator,
            cache,
        })
    }

    /// Build an engine, constructing the built-in adapters named in `config`.
    ///
    /// Providers whose adapter cannot be built (usually a missing API key)
    /// are left out with a warning; at least one must remain.
    pub fn from_config(mut config: EngineConfig) -> Result<Self, MarketDataError> {
        let mut clients = Vec::new();
        config.providers.retain(|descriptor| match provider::build_provider(descriptor) {
            Ok(client) => {
                clients.push(client);
                true
            }
            Err(e) => {
                warn!("Skipping provider {}: {}", descriptor.name, e);
                false
            }
        });

        Self::new(config, clients)
    }

    /// Build an engine from `STOCKPILE_*` environment variables.
    pub fn from_env() -> Result<Self, MarketDataError> {
        Self::from_config(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest quote for `symbol`.
    pub async fn get_snapshot(
        &self,
        symbol: &str,
        opts: FetchOptions,
    ) -> Result<MarketSnapshot, MarketDataError> {
        let sourced = self.resolve(symbol, DataRequest::Quote, &opts).await?;
        let quote = expect_quote(sourced.data)?;
        Ok(quote.into_snapshot(
            ProviderId::Owned(sourced.source),
            sourced.stale,
            sourced.selection,
        ))
    }

    /// Daily bars for `symbol` inside `range`, oldest first.
    pub async fn get_history(
        &self,
        symbol: &str,
        range: TimeRange,
        opts: FetchOptions,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.get_series(symbol, range, opts)
            .await
            .map(|series| series.data.bars)
    }

    /// Daily series for `symbol` restricted to `range`, with provenance.
    ///
    /// The provider is asked for a compact or full history depending on how
    /// far back the range starts; each size is cached separately.
    pub async fn get_series(
        &self,
        symbol: &str,
        range: TimeRange,
        opts: FetchOptions,
    ) -> Result<Sourced<RawSeries>, MarketDataError> {
        let request = DataRequest::DailySeries(range.required_size());
        let sourced = self.resolve(symbol, request, &opts).await?;
        let mut series = expect_series(sourced.data)?;
        series.bars = range.filter(&series.bars);

        Ok(Sourced {
            data: series,
            source: sourced.source,
            stale: sourced.stale,
            selection: sourced.selection,
        })
    }

    /// Most recent intraday bars for `symbol`.
    pub async fn get_intraday(
        &self,
        symbol: &str,
        interval: IntradayInterval,
        opts: FetchOptions,
    ) -> Result<Sourced<RawSeries>, MarketDataError> {
        let sourced = self
            .resolve(symbol, DataRequest::IntradaySeries(interval), &opts)
            .await?;
        Ok(Sourced {
            data: expect_series(sourced.data)?,
            source: sourced.source,
            stale: sourced.stale,
            selection: sourced.selection,
        })
    }

    /// Company fundamentals for `symbol`.
    pub async fn get_overview(
        &self,
        symbol: &str,
        opts: FetchOptions,
    ) -> Result<Sourced<RawOverview>, MarketDataError> {
        let sourced = self.resolve(symbol, DataRequest::Overview, &opts).await?;
        Ok(Sourced {
            data: expect_overview(sourced.data)?,
            source: sourced.source,
            stale: sourced.stale,
            selection: sourced.selection,
        })
    }

    /// Make the next read of `symbol` skip the fresh cache.
    ///
    /// Cached values stay available as a stale fallback.
    pub fn invalidate(&self, symbol: &str) {
        if let Some(symbol) = normalize_symbol(symbol) {
            info!("Invalidating cached data for {}", symbol);
            self.cache.invalidate_symbol(&symbol);
        }
    }

    /// Circuit and auth health of every provider, in priority order.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.orchestrator.provider_status()
    }

    /// Close a provider's circuit and lift an auth disable.
    ///
    /// Returns false if no such provider is configured.
    pub fn reset_provider(&self, provider: &str) -> bool {
        self.orchestrator.reset_provider(provider)
    }

    async fn resolve(
        &self,
        symbol: &str,
        request: DataRequest,
        opts: &FetchOptions,
    ) -> Result<Sourced<Payload>, MarketDataError> {
        let symbol =
            normalize_symbol(symbol).ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))?;
        let key = CacheKey::for_request(&symbol, &request);

        if opts.force_refresh {
            debug!("Force refresh for {}", key);
        } else if let Some(entry) = self.cache.get(&key).await {
            debug!("Cache hit for {}", key);
            let mut selection = SelectionMetadata::new();
            selection.selected = Some(ProviderId::Owned(entry.source.clone()));
            selection.selected_at = entry.fetched_at;
            selection.from_cache = true;
            return Ok(Sourced {
                data: entry.payload,
                source: entry.source,
                stale: false,
                selection,
            });
        }

        let deadline = Instant::now() + opts.deadline.unwrap_or(self.config.default_deadline);
        let race_top_k = opts.race_top_k.unwrap_or(self.config.race_top_k);

        match self
            .orchestrator
            .fetch(&symbol, request, deadline, race_top_k)
            .await
        {
            Ok(selected) => {
                let source = selected.provider.into_owned();
                self.cache
                    .put(key, &source, selected.payload.clone())
                    .await;
                Ok(Sourced {
                    data: selected.payload,
                    source,
                    stale: false,
                    selection: selected.selection,
                })
            }
            Err(mut selection) => match self.cache.get_stale(&key).await {
                Some(entry) => {
                    warn!(
                        "All providers failed for {}; serving stale data from {} fetched at {}",
                        key, entry.source, entry.fetched_at
                    );
                    selection.selected = Some(ProviderId::Owned(entry.source.clone()));
                    selection.from_cache = true;
                    Ok(Sourced {
                        data: entry.payload,
                        source: entry.source,
                        stale: true,
                        selection,
                    })
                }
                None => {
                    warn!("All providers exhausted for {} with no cached fallback", key);
                    Err(MarketDataError::AllProvidersExhausted {
                        symbol,
                        attempts: selection.summary(),
                    })
                }
            },
        }
    }
}

fn unexpected(expected: &str, payload: &Payload) -> MarketDataError {
    MarketDataError::DataInvalid {
        provider: "CACHE".to_string(),
        message: format!("Expected {} payload for {}", expected, payload.symbol()),
    }
}

fn expect_quote(payload: Payload) -> Result<RawQuote, MarketDataError> {
    match payload {
        Payload::Quote(quote) => Ok(quote),
        other => Err(unexpected("quote", &other)),
    }
}

fn expect_series(payload: Payload) -> Result<RawSeries, MarketDataError> {
    match payload {
        Payload::Series(series) => Ok(series),
        other => Err(unexpected("series", &other)),
    }
}

fn expect_overview(payload: Payload) -> Result<RawOverview, MarketDataError> {
    match payload {
        Payload::Overview(overview) => Ok(overview),
        other => Err(unexpected("overview", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use crate::config::ProviderDescriptor;
    use crate::models::{AttemptOutcome, RejectReason, SeriesSize};
    use crate::registry::{CircuitBreakerConfig, CircuitState, RateLimitConfig, RetryPolicy};

    /// Test client whose quote result can be swapped between calls.
    struct MockClient {
        id: &'static str,
        calls: AtomicUsize,
        quote: Mutex<Result<Decimal, MarketDataError>>,
        delay: Duration,
    }

    impl MockClient {
        fn new(id: &'static str, quote: Result<Decimal, MarketDataError>) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicUsize::new(0),
                quote: Mutex::new(quote),
                delay: Duration::ZERO,
            })
        }

        fn slow(id: &'static str, price: Decimal, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicUsize::new(0),
                quote: Mutex::new(Ok(price)),
                delay,
            })
        }

        fn set_quote(&self, quote: Result<Decimal, MarketDataError>) {
            *self.quote.lock().unwrap() = quote;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for MockClient {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.quote.lock().unwrap().clone();
            result.map(|price| RawQuote::new(symbol, price, Utc::now()))
        }

        async fn fetch_daily_series(
            &self,
            symbol: &str,
            size: SeriesSize,
        ) -> Result<RawSeries, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let days = match size {
                SeriesSize::Compact => 100,
                SeriesSize::Full => 1000,
            };
            let now = Utc::now();
            let bars = (0..days)
                .map(|i| {
                    let close = Decimal::from(100 + i);
                    Bar {
                        timestamp: now - chrono::Duration::days(i),
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: None,
                    }
                })
                .collect();
            Ok(RawSeries::new(symbol, "1d", bars))
        }
    }

    fn network() -> MarketDataError {
        MarketDataError::Network {
            provider: "MOCK".to_string(),
            message: "connection refused".to_string(),
        }
    }

    fn descriptor(name: &str, priority: u32) -> ProviderDescriptor {
        let mut descriptor = ProviderDescriptor::new(name, priority);
        descriptor.rate_limit = Some(RateLimitConfig {
            burst_limit: 0,
            min_interval: Duration::ZERO,
            ..RateLimitConfig::default()
        });
        descriptor
    }

    fn config(dir: &TempDir, providers: Vec<ProviderDescriptor>) -> EngineConfig {
        EngineConfig {
            providers,
            cache_dir: dir.path().to_path_buf(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                jitter: Duration::ZERO,
            },
            ..EngineConfig::default()
        }
    }

    fn engine(config: EngineConfig, clients: Vec<Arc<MockClient>>) -> Engine {
        Engine::new(
            config,
            clients
                .into_iter()
                .map(|c| c as Arc<dyn ProviderClient>)
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_is_skipped_and_next_provider_selected() {
        let dir = TempDir::new().unwrap();
        let mut p1_descriptor = descriptor("P1", 1);
        p1_descriptor.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let p1 = MockClient::new("P1", Err(network()));
        let p2 = MockClient::new("P2", Ok(dec!(150.20)));
        let engine = engine(
            config(&dir, vec![p1_descriptor, descriptor("P2", 2)]),
            vec![p1.clone(), p2.clone()],
        );

        // First call trips P1's breaker
        engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.provider_status()[0].circuit_state, CircuitState::Open);
        let p1_calls = p1.calls();

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default().force_refresh())
            .await
            .unwrap();

        assert_eq!(snapshot.source, "P2");
        assert_eq!(snapshot.price, dec!(150.20));
        assert!(!snapshot.stale);
        assert_eq!(snapshot.selection.summary(), "P1: CircuitOpen -> P2: accepted");
        assert_eq!(p1.calls(), p1_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_prices_everywhere_without_cache_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let engine = engine(
            config(&dir, vec![descriptor("P1", 1), descriptor("P2", 2)]),
            vec![
                MockClient::new("P1", Ok(dec!(0))),
                MockClient::new("P2", Ok(dec!(-3))),
            ],
        );

        let err = engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap_err();

        match err {
            MarketDataError::AllProvidersExhausted { symbol, attempts } => {
                assert_eq!(symbol, "AAPL");
                assert!(attempts.contains("P1: DataInvalid"));
                assert!(attempts.contains("P2: DataInvalid"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_prices_everywhere_with_cache_serves_stale() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::new("P1", Ok(dec!(0)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        let key = CacheKey::for_request("AAPL", &DataRequest::Quote);
        let old = Utc::now() - chrono::Duration::hours(1);
        engine
            .cache
            .put_with_timestamp(
                key,
                "P1",
                Payload::Quote(RawQuote::new("AAPL", dec!(149.10), old)),
                old,
            )
            .await;

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();

        assert!(snapshot.stale);
        assert_eq!(snapshot.price, dec!(149.10));
        assert_eq!(snapshot.source, "P1");
        assert!(snapshot.selection.from_cache);
        assert!(matches!(
            snapshot.selection.outcome_for("P1"),
            Some(AttemptOutcome::Rejected(RejectReason::DataInvalid { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failures_disable_provider_for_session() {
        let dir = TempDir::new().unwrap();
        let auth = MarketDataError::Auth {
            provider: "P1".to_string(),
            message: "Invalid API key".to_string(),
        };
        let p1 = MockClient::new("P1", Err(auth));
        let p2 = MockClient::new("P2", Ok(dec!(99)));
        let engine = engine(
            config(&dir, vec![descriptor("P1", 1), descriptor("P2", 2)]),
            vec![p1.clone(), p2.clone()],
        );

        for _ in 0..3 {
            engine
                .get_snapshot("AAPL", FetchOptions::default().force_refresh())
                .await
                .unwrap();
        }
        assert_eq!(p1.calls(), 3);
        assert!(engine.provider_status()[0].disabled);

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default().force_refresh())
            .await
            .unwrap();
        assert_eq!(p1.calls(), 3);
        assert_eq!(
            snapshot.selection.summary(),
            "P1: AuthError(disabled) -> P2: accepted"
        );

        // A manual reset re-enables it
        assert!(engine.reset_provider("P1"));
        assert!(!engine.provider_status()[0].disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_hit_skips_providers() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::new("P1", Ok(dec!(10)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        let first = engine
            .get_snapshot(" aapl ", FetchOptions::default())
            .await
            .unwrap();
        let second = engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(p1.calls(), 1);
        assert_eq!(first.symbol, "AAPL");
        assert_eq!(second.price, dec!(10));
        assert_eq!(second.source, "P1");
        assert!(second.selection.from_cache);
        assert!(!second.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_survives_engine_restart() {
        let dir = TempDir::new().unwrap();
        {
            let p1 = MockClient::new("P1", Ok(dec!(10)));
            let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1]);
            engine
                .get_snapshot("MSFT", FetchOptions::default())
                .await
                .unwrap();
        }

        let p1 = MockClient::new("P1", Ok(dec!(20)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);
        let snapshot = engine
            .get_snapshot("MSFT", FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(snapshot.price, dec!(10));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::new("P1", Ok(dec!(10)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();
        engine.invalidate("aapl");
        p1.set_quote(Ok(dec!(11)));
        // Invalidation marks are compared against wall-clock fetch times
        std::thread::sleep(Duration::from_millis(5));

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(p1.calls(), 2);
        assert_eq!(snapshot.price, dec!(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_falls_back_to_stale() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::slow("P1", dec!(10), Duration::from_secs(60));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        let err = engine
            .get_snapshot(
                "AAPL",
                FetchOptions::default().with_deadline(Duration::from_secs(2)),
            )
            .await
            .unwrap_err();
        match err {
            MarketDataError::AllProvidersExhausted { attempts, .. } => {
                assert_eq!(attempts, "P1: DeadlineExceeded")
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }

        let key = CacheKey::for_request("AAPL", &DataRequest::Quote);
        let old = Utc::now() - chrono::Duration::hours(1);
        engine
            .cache
            .put_with_timestamp(
                key,
                "P1",
                Payload::Quote(RawQuote::new("AAPL", dec!(9), old)),
                old,
            )
            .await;

        let snapshot = engine
            .get_snapshot(
                "AAPL",
                FetchOptions::default().with_deadline(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert!(snapshot.stale);
        assert_eq!(snapshot.price, dec!(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_option_keeps_priority_selection() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::slow("P1", dec!(100), Duration::from_secs(1));
        let p2 = MockClient::new("P2", Ok(dec!(200)));
        let engine = engine(
            config(&dir, vec![descriptor("P1", 1), descriptor("P2", 2)]),
            vec![p1.clone(), p2.clone()],
        );

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default().race(2))
            .await
            .unwrap();

        assert_eq!(snapshot.source, "P1");
        assert_eq!(snapshot.price, dec!(100));
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_filtered_to_range() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::new("P1", Ok(dec!(10)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        let range = TimeRange::last_days(10);
        let bars = engine
            .get_history("AAPL", range, FetchOptions::default())
            .await
            .unwrap();

        assert!(!bars.is_empty());
        assert!(bars.len() <= 11);
        assert!(bars.iter().all(|b| range.contains(&b.timestamp)));
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        // The same compact series is served from cache for another short range
        let series = engine
            .get_series("AAPL", TimeRange::last_days(30), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(p1.calls(), 1);
        assert!(series.selection.from_cache);
        assert_eq!(series.source, "P1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_operation_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let engine = engine(
            config(&dir, vec![descriptor("P1", 1)]),
            vec![MockClient::new("P1", Ok(dec!(10)))],
        );

        let err = engine
            .get_overview("AAPL", FetchOptions::default())
            .await
            .unwrap_err();
        match err {
            MarketDataError::AllProvidersExhausted { attempts, .. } => {
                assert_eq!(attempts, "P1: NotSupported")
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_symbol_is_not_found() {
        let dir = TempDir::new().unwrap();
        let p1 = MockClient::new("P1", Ok(dec!(10)));
        let engine = engine(config(&dir, vec![descriptor("P1", 1)]), vec![p1.clone()]);

        assert!(matches!(
            engine.get_snapshot("   ", FetchOptions::default()).await,
            Err(MarketDataError::NotFound(_))
        ));
        assert_eq!(p1.calls(), 0);
    }

    #[test]
    fn test_missing_client_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = Engine::new(
            config(&dir, vec![descriptor("P1", 1), descriptor("P2", 2)]),
            vec![MockClient::new("P1", Ok(dec!(1))) as Arc<dyn ProviderClient>],
        );
        assert!(matches!(result, Err(MarketDataError::Config(_))));
    }

    #[tokio::test]
    async fn test_synthetic_provider_is_tagged() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::from_config(config(&dir, vec![descriptor("SYNTHETIC", 1)])).unwrap();

        let snapshot = engine
            .get_snapshot("AAPL", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(snapshot.source, "SYNTHETIC");
        assert_eq!(snapshot.selection.selected.as_deref(), Some("SYNTHETIC"));
    }
}
