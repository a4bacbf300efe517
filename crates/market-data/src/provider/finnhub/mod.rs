//! Finnhub market data provider implementation.
//!
//! This module provides market data from the Finnhub API:
//! - Latest quotes via /quote
//! - Daily and intraday candles via /stock/candle
//! - Company profiles via /stock/profile2
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{Bar, IntradayInterval, RawOverview, RawQuote, RawSeries, SeriesSize};
use crate::provider::http::{build_client, f64_to_decimal, non_empty, parse_error, send_text};
use crate::provider::ProviderClient;
use crate::registry::RateLimitConfig;

const BASE_URL: &str = "https://finnhub.io/api/v1";
pub(crate) const PROVIDER_ID: &str = "FINNHUB";

/// Calendar days requested for a compact daily series.
const COMPACT_DAYS: i64 = 150;

/// Calendar days requested for a full daily series.
const FULL_DAYS: i64 = 20 * 365;

/// Free tier: 60 calls per minute.
pub(crate) fn default_limits() -> RateLimitConfig {
    RateLimitConfig {
        max_per_window: 60,
        window: Duration::from_secs(60),
        burst_limit: 0,
        burst_window: Duration::ZERO,
        min_interval: Duration::from_millis(100),
    }
}

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<f64>,
    /// High price of the day
    h: Option<f64>,
    /// Low price of the day
    l: Option<f64>,
    /// Open price of the day
    o: Option<f64>,
    /// Previous close
    pc: Option<f64>,
    /// Timestamp (Unix)
    t: Option<i64>,
}

/// Response from /stock/candle endpoint
#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
    #[serde(default)]
    t: Vec<i64>,
}

/// Response from /stock/profile2 endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    name: Option<String>,
    ticker: Option<String>,
    finnhub_industry: Option<String>,
    country: Option<String>,
    currency: Option<String>,
    exchange: Option<String>,
    /// Market capitalization (in millions)
    market_capitalization: Option<f64>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub market data provider.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
}

impl FinnhubProvider {
    /// Create a new Finnhub provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    /// Make a GET request to the Finnhub API.
    async fn fetch(
        &self,
        symbol: &str,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        // API key goes in a header rather than the query string
        let request = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(params);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        send_text(PROVIDER_ID, symbol, request).await
    }

    fn parse_quote(symbol: &str, text: &str) -> Result<RawQuote, MarketDataError> {
        let response: QuoteResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;

        let price = response
            .c
            .ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))?;

        // Finnhub returns zeros for unknown symbols instead of an error
        if price == 0.0 && response.o.unwrap_or(0.0) == 0.0 && response.pc.unwrap_or(0.0) == 0.0 {
            return Err(MarketDataError::NotFound(symbol.to_string()));
        }

        let price = f64_to_decimal(price).ok_or_else(|| MarketDataError::DataInvalid {
            provider: PROVIDER_ID.to_string(),
            message: format!("Invalid price: {}", price),
        })?;

        let as_of = response
            .t
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        let mut quote = RawQuote::new(symbol, price, as_of);
        quote.open = response.o.and_then(f64_to_decimal);
        quote.high = response.h.and_then(f64_to_decimal);
        quote.low = response.l.and_then(f64_to_decimal);
        quote.close = Some(price);
        Ok(quote)
    }

    fn parse_candles(
        symbol: &str,
        interval: &str,
        text: &str,
    ) -> Result<RawSeries, MarketDataError> {
        let response: CandleResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;

        if response.s == "no_data" {
            return Err(MarketDataError::NotFound(symbol.to_string()));
        }
        if response.s != "ok" {
            return Err(MarketDataError::DataInvalid {
                provider: PROVIDER_ID.to_string(),
                message: format!("Unexpected candle status: {}", response.s),
            });
        }

        let len = response.t.len();
        if response.c.len() != len
            || response.o.len() != len
            || response.h.len() != len
            || response.l.len() != len
        {
            return Err(MarketDataError::DataInvalid {
                provider: PROVIDER_ID.to_string(),
                message: "Mismatched array lengths in candle response".to_string(),
            });
        }

        let mut bars = Vec::with_capacity(len);
        for i in 0..len {
            let Some(timestamp) = Utc.timestamp_opt(response.t[i], 0).single() else {
                warn!("Invalid timestamp at index {}: {}", i, response.t[i]);
                continue;
            };
            let prices = (
                f64_to_decimal(response.o[i]),
                f64_to_decimal(response.h[i]),
                f64_to_decimal(response.l[i]),
                f64_to_decimal(response.c[i]),
            );
            let (Some(open), Some(high), Some(low), Some(close)) = prices else {
                warn!("Invalid prices at index {} for {}", i, symbol);
                continue;
            };
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume: response.v.get(i).and_then(|&v| f64_to_decimal(v)),
            });
        }

        Ok(RawSeries::new(symbol, interval, bars))
    }

    fn parse_profile(symbol: &str, text: &str) -> Result<RawOverview, MarketDataError> {
        // Unknown symbols come back as an empty object
        if text.trim() == "{}" {
            return Err(MarketDataError::NotFound(symbol.to_string()));
        }

        let response: ProfileResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;

        if response.name.is_none() && response.ticker.is_none() {
            return Err(MarketDataError::NotFound(symbol.to_string()));
        }

        let market_cap = response
            .market_capitalization
            .and_then(f64_to_decimal)
            .map(|millions| millions * Decimal::from(1_000_000));

        Ok(RawOverview {
            symbol: response.ticker.unwrap_or_else(|| symbol.to_string()),
            name: non_empty(&response.name),
            asset_type: Some("Common Stock".to_string()),
            industry: non_empty(&response.finnhub_industry),
            sector: non_empty(&response.finnhub_industry),
            country: non_empty(&response.country),
            currency: non_empty(&response.currency),
            exchange: non_empty(&response.exchange),
            market_cap,
            ..RawOverview::default()
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        resolution: &str,
        days: i64,
        interval: &str,
    ) -> Result<RawSeries, MarketDataError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(days);
        let from_ts = start.timestamp().to_string();
        let to_ts = end.timestamp().to_string();

        let params = [
            ("symbol", symbol),
            ("resolution", resolution),
            ("from", from_ts.as_str()),
            ("to", to_ts.as_str()),
        ];
        let text = self.fetch(symbol, "/stock/candle", &params).await?;
        let series = Self::parse_candles(symbol, interval, &text)?;

        debug!(
            "Finnhub: fetched {} {} bars for {}",
            series.bars.len(),
            interval,
            symbol
        );
        Ok(series)
    }
}

#[async_trait]
impl ProviderClient for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn default_limits(&self) -> RateLimitConfig {
        default_limits()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
        let text = self.fetch(symbol, "/quote", &[("symbol", symbol)]).await?;
        Self::parse_quote(symbol, &text)
    }

    async fn fetch_daily_series(
        &self,
        symbol: &str,
        size: SeriesSize,
    ) -> Result<RawSeries, MarketDataError> {
        let days = match size {
            SeriesSize::Compact => COMPACT_DAYS,
            SeriesSize::Full => FULL_DAYS,
        };
        self.fetch_candles(symbol, "D", days, "1d").await
    }

    async fn fetch_intraday_series(
        &self,
        symbol: &str,
        interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        let resolution = match interval {
            IntradayInterval::OneMinute => "1",
            IntradayInterval::FiveMinutes => "5",
            IntradayInterval::FifteenMinutes => "15",
            IntradayInterval::ThirtyMinutes => "30",
            IntradayInterval::SixtyMinutes => "60",
        };
        self.fetch_candles(symbol, resolution, 5, interval.as_str())
            .await
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<RawOverview, MarketDataError> {
        let text = self
            .fetch(symbol, "/stock/profile2", &[("symbol", symbol)])
            .await?;
        Self::parse_profile(symbol, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_id() {
        let provider = FinnhubProvider::new("test_key".to_string());
        assert_eq!(provider.id(), "FINNHUB");
        assert_eq!(provider.default_limits().max_per_window, 60);
    }

    #[test]
    fn test_quote_parsing() {
        let json = r#"{"c":261.74,"d":0.5,"dp":0.19,"h":263.31,"l":260.68,"o":261.07,"pc":261.24,"t":1582641000}"#;
        let quote = FinnhubProvider::parse_quote("AAPL", json).unwrap();

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(261.74));
        assert_eq!(quote.high, Some(dec!(263.31)));
        assert_eq!(quote.as_of.timestamp(), 1582641000);
    }

    #[test]
    fn test_unknown_symbol_quote() {
        let json = r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#;
        assert!(matches!(
            FinnhubProvider::parse_quote("NOPE", json),
            Err(MarketDataError::NotFound(_))
        ));
    }

    #[test]
    fn test_candle_parsing() {
        let json = r#"{
            "s": "ok",
            "t": [1709251200, 1709164800],
            "o": [179.55, 181.27],
            "h": [180.53, 182.57],
            "l": [177.38, 179.53],
            "c": [179.66, 180.75],
            "v": [73488000, 136682600]
        }"#;

        let series = FinnhubProvider::parse_candles("AAPL", "1d", json).unwrap();
        assert_eq!(series.bars.len(), 2);
        // Sorted oldest first
        assert_eq!(series.bars[0].close, dec!(180.75));
        assert_eq!(series.bars[1].volume, Some(dec!(73488000)));
    }

    #[test]
    fn test_candle_no_data_and_mismatch() {
        assert!(matches!(
            FinnhubProvider::parse_candles("NOPE", "1d", r#"{"s":"no_data"}"#),
            Err(MarketDataError::NotFound(_))
        ));

        let json = r#"{"s":"ok","t":[1,2],"o":[1.0],"h":[1.0],"l":[1.0],"c":[1.0]}"#;
        assert!(matches!(
            FinnhubProvider::parse_candles("AAPL", "1d", json),
            Err(MarketDataError::DataInvalid { .. })
        ));
    }

    #[test]
    fn test_profile_parsing() {
        let json = r#"{
            "country": "US",
            "currency": "USD",
            "exchange": "NASDAQ NMS - GLOBAL MARKET",
            "finnhubIndustry": "Technology",
            "marketCapitalization": 2800000.5,
            "name": "Apple Inc",
            "ticker": "AAPL"
        }"#;

        let overview = FinnhubProvider::parse_profile("AAPL", json).unwrap();
        assert_eq!(overview.name.as_deref(), Some("Apple Inc"));
        assert_eq!(overview.market_cap, Some(dec!(2800000500000)));
        assert_eq!(overview.currency.as_deref(), Some("USD"));

        assert!(matches!(
            FinnhubProvider::parse_profile("NOPE", "{}"),
            Err(MarketDataError::NotFound(_))
        ));
    }
}
