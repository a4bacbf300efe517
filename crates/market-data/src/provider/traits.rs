//! Provider trait definitions.
//!
//! This module defines the `ProviderClient` trait that every external data
//! source adapter implements.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{
    DataRequest, IntradayInterval, Payload, RawOverview, RawQuote, RawSeries, SeriesSize,
};
use crate::registry::RateLimitConfig;

/// Uniform interface over one external market data source.
///
/// Adapters only build the provider request, parse the provider response
/// and map it into the normalized types or a classified error. Retrying,
/// rate limiting and caching happen in the orchestrator so that policy is
/// the same for every provider.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use stockpile_market_data::provider::ProviderClient;
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl ProviderClient for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
///         // ...
///     }
///
///     async fn fetch_daily_series(
///         &self,
///         symbol: &str,
///         size: SeriesSize,
///     ) -> Result<RawSeries, MarketDataError> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "YAHOO", "ALPHA_VANTAGE", etc.
    /// Must match the name of the provider's descriptor.
    fn id(&self) -> &'static str;

    /// Rate limits used when the configuration doesn't override them.
    fn default_limits(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    /// Fetch the latest quote for a symbol.
    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError>;

    /// Fetch daily OHLCV bars, oldest first.
    async fn fetch_daily_series(
        &self,
        symbol: &str,
        size: SeriesSize,
    ) -> Result<RawSeries, MarketDataError>;

    /// Fetch intraday bars.
    ///
    /// Default implementation returns `NotSupported`.
    async fn fetch_intraday_series(
        &self,
        _symbol: &str,
        _interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        Err(MarketDataError::NotSupported {
            operation: "intraday_series".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Fetch company fundamentals.
    ///
    /// Default implementation returns `NotSupported`.
    async fn fetch_overview(&self, _symbol: &str) -> Result<RawOverview, MarketDataError> {
        Err(MarketDataError::NotSupported {
            operation: "overview".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Dispatch a request to the matching fetch method.
    async fn fetch(&self, symbol: &str, request: &DataRequest) -> Result<Payload, MarketDataError> {
        match *request {
            DataRequest::Quote => self.fetch_quote(symbol).await.map(Payload::Quote),
            DataRequest::DailySeries(size) => self
                .fetch_daily_series(symbol, size)
                .await
                .map(Payload::Series),
            DataRequest::IntradaySeries(interval) => self
                .fetch_intraday_series(symbol, interval)
                .await
                .map(Payload::Series),
            DataRequest::Overview => self.fetch_overview(symbol).await.map(Payload::Overview),
        }
    }
}
