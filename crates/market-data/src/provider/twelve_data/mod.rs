//! Twelve Data market data provider implementation.
//!
//! - Latest quotes via /quote
//! - Daily and intraday bars via /time_series
//!
//! Errors usually arrive as a 200 response with `"status": "error"` and an
//! HTTP-like `code`, which is classified the same way as a real status.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::{Bar, IntradayInterval, RawQuote, RawSeries, SeriesSize};
use crate::provider::http::{
    build_client, non_empty, parse_decimal, parse_error, parse_opt_decimal, send_text,
    status_error,
};
use crate::provider::ProviderClient;
use crate::registry::RateLimitConfig;

const BASE_URL: &str = "https://api.twelvedata.com";
pub(crate) const PROVIDER_ID: &str = "TWELVE_DATA";

/// Cooldown assumed when a throttling error carries no `Retry-After`.
const THROTTLE_COOLDOWN: Duration = Duration::from_secs(60);

/// Bars requested for a compact daily series.
const COMPACT_OUTPUTSIZE: &str = "100";

/// Largest page the API serves.
const FULL_OUTPUTSIZE: &str = "5000";

/// Paid plan: 610 calls per minute, bursts of 50 per 10 seconds, ~98 ms apart.
pub(crate) fn default_limits() -> RateLimitConfig {
    RateLimitConfig {
        max_per_window: 610,
        window: Duration::from_secs(60),
        burst_limit: 50,
        burst_window: Duration::from_secs(10),
        min_interval: Duration::from_millis(98),
    }
}

/// Error body shared by every endpoint.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    symbol: Option<String>,
    exchange: Option<String>,
    currency: Option<String>,
    datetime: Option<String>,
    timestamp: Option<i64>,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    close: Option<String>,
    volume: Option<String>,
    #[serde(flatten)]
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    meta: Option<TimeSeriesMeta>,
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
    #[serde(flatten)]
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesMeta {
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

/// Twelve Data market data provider.
pub struct TwelveDataProvider {
    client: Client,
    api_key: String,
}

impl TwelveDataProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    async fn fetch(
        &self,
        symbol: &str,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);
        let request = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("apikey {}", self.api_key),
            )
            .query(params);

        debug!("Twelve Data request: {} for {}", endpoint, symbol);

        send_text(PROVIDER_ID, symbol, request).await
    }

    /// Classify an in-body error.
    fn check_error(symbol: &str, error: &ErrorBody) -> Result<(), MarketDataError> {
        if error.status.as_deref() != Some("error") {
            return Ok(());
        }

        let message = error.message.clone().unwrap_or_default();
        let code = error
            .code
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);

        Err(match code {
            StatusCode::TOO_MANY_REQUESTS => MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: Some(THROTTLE_COOLDOWN),
            },
            // Unknown or malformed symbols are reported as 400
            StatusCode::BAD_REQUEST if message.to_lowercase().contains("symbol") => {
                MarketDataError::NotFound(symbol.to_string())
            }
            StatusCode::BAD_REQUEST => MarketDataError::DataInvalid {
                provider: PROVIDER_ID.to_string(),
                message,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MarketDataError::Auth {
                provider: PROVIDER_ID.to_string(),
                message,
            },
            other => status_error(PROVIDER_ID, symbol, other, None, &message),
        })
    }

    fn parse_quote(symbol: &str, text: &str) -> Result<RawQuote, MarketDataError> {
        let response: QuoteResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;
        Self::check_error(symbol, &response.error)?;

        let price = parse_opt_decimal(&response.close).ok_or_else(|| MarketDataError::DataInvalid {
            provider: PROVIDER_ID.to_string(),
            message: format!("Missing close for {}", symbol),
        })?;

        let as_of = response
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or_else(|| response.datetime.as_deref().and_then(Self::parse_datetime))
            .unwrap_or_else(Utc::now);

        let mut quote = RawQuote::new(
            non_empty(&response.symbol).unwrap_or_else(|| symbol.to_string()),
            price,
            as_of,
        );
        quote.open = parse_opt_decimal(&response.open);
        quote.high = parse_opt_decimal(&response.high);
        quote.low = parse_opt_decimal(&response.low);
        quote.close = Some(price);
        quote.volume = parse_opt_decimal(&response.volume);
        quote.currency = non_empty(&response.currency);
        quote.exchange = non_empty(&response.exchange);
        Ok(quote)
    }

    fn parse_series(
        symbol: &str,
        interval: &str,
        text: &str,
    ) -> Result<RawSeries, MarketDataError> {
        let response: TimeSeriesResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;
        Self::check_error(symbol, &response.error)?;

        let bars = response
            .values
            .iter()
            .filter_map(|v| {
                Some(Bar {
                    timestamp: Self::parse_datetime(&v.datetime)?,
                    open: parse_decimal(&v.open)?,
                    high: parse_decimal(&v.high)?,
                    low: parse_decimal(&v.low)?,
                    close: parse_decimal(&v.close)?,
                    volume: v.volume.as_deref().and_then(parse_decimal),
                })
            })
            .collect();

        let currency = response.meta.and_then(|m| non_empty(&m.currency));
        Ok(RawSeries::new(symbol, interval, bars).with_currency(currency))
    }

    fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(|dt| dt.and_utc())
    }

    async fn time_series(
        &self,
        symbol: &str,
        interval: &str,
        outputsize: &str,
    ) -> Result<RawSeries, MarketDataError> {
        let params = [
            ("symbol", symbol),
            ("interval", interval),
            ("outputsize", outputsize),
        ];
        let text = self.fetch(symbol, "/time_series", &params).await?;
        Self::parse_series(symbol, interval, &text)
    }
}

#[async_trait]
impl ProviderClient for TwelveDataProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn default_limits(&self) -> RateLimitConfig {
        default_limits()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
        // The quote endpoint takes no interval parameter
        let text = self.fetch(symbol, "/quote", &[("symbol", symbol)]).await?;
        Self::parse_quote(symbol, &text)
    }

    async fn fetch_daily_series(
        &self,
        symbol: &str,
        size: SeriesSize,
    ) -> Result<RawSeries, MarketDataError> {
        let outputsize = match size {
            SeriesSize::Compact => COMPACT_OUTPUTSIZE,
            SeriesSize::Full => FULL_OUTPUTSIZE,
        };
        let mut series = self.time_series(symbol, "1day", outputsize).await?;
        series.interval = "1d".to_string();
        Ok(series)
    }

    async fn fetch_intraday_series(
        &self,
        symbol: &str,
        interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        let td_interval = match interval {
            IntradayInterval::SixtyMinutes => "1h",
            other => other.as_str(),
        };
        let mut series = self.time_series(symbol, td_interval, "100").await?;
        series.interval = interval.as_str().to_string();
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_parsing() {
        let json = r#"{
            "symbol": "2222:Tadawul",
            "name": "Saudi Arabian Oil Co",
            "exchange": "Tadawul",
            "currency": "SAR",
            "datetime": "2024-03-03",
            "timestamp": 1709452800,
            "open": "31.90000",
            "high": "32.00000",
            "low": "31.75000",
            "close": "31.85000",
            "volume": "8061321",
            "previous_close": "31.90000"
        }"#;

        let quote = TwelveDataProvider::parse_quote("2222:TADAWUL", json).unwrap();
        assert_eq!(quote.price, dec!(31.85));
        assert_eq!(quote.currency.as_deref(), Some("SAR"));
        assert_eq!(quote.exchange.as_deref(), Some("Tadawul"));
        assert_eq!(quote.as_of.timestamp(), 1709452800);
    }

    #[test]
    fn test_series_parsing() {
        let json = r#"{
            "meta": {"symbol": "AAPL", "interval": "1day", "currency": "USD"},
            "values": [
                {"datetime": "2024-03-01", "open": "179.55", "high": "180.53", "low": "177.38", "close": "179.66", "volume": "73488000"},
                {"datetime": "2024-02-29", "open": "181.27", "high": "182.57", "low": "179.53", "close": "180.75", "volume": "136682600"}
            ],
            "status": "ok"
        }"#;

        let series = TwelveDataProvider::parse_series("AAPL", "1day", json).unwrap();
        assert_eq!(series.currency.as_deref(), Some("USD"));
        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.bars[0].close, dec!(180.75));
    }

    #[test]
    fn test_in_body_errors() {
        let limited = r#"{"code":429,"message":"You have run out of API credits for the current minute.","status":"error"}"#;
        let err = TwelveDataProvider::parse_quote("AAPL", limited).unwrap_err();
        assert!(matches!(err, MarketDataError::RateLimited { .. }));
        assert_eq!(err.retry_after(), Some(THROTTLE_COOLDOWN));

        let auth = r#"{"code":401,"message":"**apikey** parameter is incorrect or not specified.","status":"error"}"#;
        assert!(matches!(
            TwelveDataProvider::parse_quote("AAPL", auth),
            Err(MarketDataError::Auth { .. })
        ));

        let unknown = r#"{"code":400,"message":"**symbol** not found: NOPE.","status":"error"}"#;
        assert!(matches!(
            TwelveDataProvider::parse_series("NOPE", "1day", unknown),
            Err(MarketDataError::NotFound(_))
        ));

        let not_found = r#"{"code":404,"message":"Not found","status":"error"}"#;
        assert!(matches!(
            TwelveDataProvider::parse_quote("NOPE", not_found),
            Err(MarketDataError::NotFound(_))
        ));
    }

    #[test]
    fn test_default_limits() {
        let limits = default_limits();
        assert_eq!(limits.max_per_window, 610);
        assert_eq!(limits.burst_limit, 50);
        assert_eq!(limits.min_interval, Duration::from_millis(98));
    }
}
