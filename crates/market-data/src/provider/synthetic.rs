//! Deterministic synthetic provider for tests and local development.
//!
//! Only compiled with the `synthetic` feature (or in this crate's tests), so
//! a production build cannot route requests to it. Everything it serves is
//! tagged `SYNTHETIC` in the selection metadata.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Bar, IntradayInterval, RawOverview, RawQuote, RawSeries, SeriesSize};
use crate::provider::ProviderClient;
use crate::registry::RateLimitConfig;

pub(crate) const PROVIDER_ID: &str = "SYNTHETIC";

/// Serves made-up but stable prices derived from the symbol.
#[derive(Debug, Default, Clone)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    pub fn new() -> Self {
        Self
    }

    fn seed(symbol: &str) -> u64 {
        let digest = md5::compute(symbol.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.0[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Base price in cents, between 10.00 and 500.00.
    fn base_cents(symbol: &str) -> i64 {
        1_000 + (Self::seed(symbol) % 49_000) as i64
    }

    fn walk(symbol: &str, timestamps: Vec<chrono::DateTime<Utc>>) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(Self::seed(symbol));
        let mut cents = Self::base_cents(symbol);

        timestamps
            .into_iter()
            .map(|timestamp| {
                let open = cents;
                // +/- 2% per step, never below one dollar
                let step = rng.gen_range(-200..=200) * open / 10_000;
                let close = (open + step).max(100);
                let spread = rng.gen_range(0..=50) * open / 10_000;
                cents = close;

                Bar {
                    timestamp,
                    open: Decimal::new(open, 2),
                    high: Decimal::new(open.max(close) + spread, 2),
                    low: Decimal::new((open.min(close) - spread).max(1), 2),
                    close: Decimal::new(close, 2),
                    volume: Some(Decimal::from(rng.gen_range(10_000u32..5_000_000))),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ProviderClient for SyntheticProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn default_limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            min_interval: Duration::ZERO,
            ..RateLimitConfig::default()
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
        let price = Decimal::new(Self::base_cents(symbol), 2);
        let mut quote = RawQuote::new(symbol, price, Utc::now());
        quote.close = Some(price);
        quote.currency = Some("USD".to_string());
        quote.exchange = Some(PROVIDER_ID.to_string());
        Ok(quote)
    }

    async fn fetch_daily_series(
        &self,
        symbol: &str,
        size: SeriesSize,
    ) -> Result<RawSeries, MarketDataError> {
        let count = match size {
            SeriesSize::Compact => SeriesSize::COMPACT_TRADING_DAYS as usize,
            SeriesSize::Full => 5 * 252,
        };

        let today = Utc::now().date_naive();
        let mut days: Vec<_> = (0..)
            .map(|offset| today - ChronoDuration::days(offset))
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .take(count)
            .filter_map(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt))
            .collect();
        days.reverse();

        Ok(RawSeries::new(symbol, "1d", Self::walk(symbol, days)).with_currency(Some("USD".into())))
    }

    async fn fetch_intraday_series(
        &self,
        symbol: &str,
        interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        let minutes = match interval {
            IntradayInterval::OneMinute => 1,
            IntradayInterval::FiveMinutes => 5,
            IntradayInterval::FifteenMinutes => 15,
            IntradayInterval::ThirtyMinutes => 30,
            IntradayInterval::SixtyMinutes => 60,
        };

        let now = Utc::now();
        let timestamps = (0..100i64)
            .rev()
            .map(|i| now - ChronoDuration::minutes(i * minutes))
            .collect();

        Ok(RawSeries::new(symbol, interval.as_str(), Self::walk(symbol, timestamps))
            .with_currency(Some("USD".into())))
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<RawOverview, MarketDataError> {
        let mut overview = RawOverview::new(symbol)
            .name(format!("{} Synthetic Corp", symbol))
            .sector("Synthetic")
            .country("US");
        overview.currency = Some("USD".to_string());
        overview.exchange = Some(PROVIDER_ID.to_string());
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quotes_are_deterministic() {
        let provider = SyntheticProvider::new();
        let first = provider.fetch_quote("AAPL").await.unwrap();
        let second = provider.fetch_quote("AAPL").await.unwrap();
        assert_eq!(first.price, second.price);
        assert!(first.price >= Decimal::new(1_000, 2));
        assert!(first.price < Decimal::new(50_000, 2));
    }

    #[tokio::test]
    async fn test_daily_series_shape() {
        let provider = SyntheticProvider::new();
        let series = provider
            .fetch_daily_series("MSFT", SeriesSize::Compact)
            .await
            .unwrap();

        assert_eq!(series.bars.len(), 100);
        assert!(series
            .bars
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert!(series
            .bars
            .iter()
            .all(|b| b.high >= b.low && b.low > Decimal::ZERO));
    }
}
