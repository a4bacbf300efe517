//! Alpha Vantage market data provider implementation.
//!
//! This module provides market data from the Alpha Vantage API:
//! - Latest quotes via GLOBAL_QUOTE
//! - Daily bars via TIME_SERIES_DAILY
//! - Intraday bars via TIME_SERIES_INTRADAY
//! - Company fundamentals via OVERVIEW
//!
//! Note: Alpha Vantage free tier is limited to 5 API calls per minute.
//! The API reports errors and throttling in the body of a 200 response.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::{Bar, IntradayInterval, RawOverview, RawQuote, RawSeries, SeriesSize};
use crate::provider::http::{
    build_client, non_empty, parse_decimal, parse_error, parse_opt_decimal, send_text,
};
use crate::provider::ProviderClient;
use crate::registry::RateLimitConfig;

const BASE_URL: &str = "https://www.alphavantage.co/query";
pub(crate) const PROVIDER_ID: &str = "ALPHA_VANTAGE";

/// Cooldown assumed when the API reports throttling in the body.
const THROTTLE_COOLDOWN: Duration = Duration::from_secs(60);

/// Free tier: 5 calls per minute, spaced 12 seconds apart.
pub(crate) fn default_limits() -> RateLimitConfig {
    RateLimitConfig {
        max_per_window: 5,
        window: Duration::from_secs(60),
        burst_limit: 0,
        burst_window: Duration::ZERO,
        min_interval: Duration::from_secs(12),
    }
}

/// Alpha Vantage market data provider.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

// ============================================================================
// Response structures for Alpha Vantage API
// ============================================================================

/// Error and throttling notices that can appear in any response.
#[derive(Debug, Default, Deserialize)]
struct ApiNotice {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// GLOBAL_QUOTE response
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
}

/// TIME_SERIES_DAILY / TIME_SERIES_INTRADAY response.
///
/// The series key depends on the function ("Time Series (Daily)",
/// "Time Series (5min)"), so the remaining fields are collected and the
/// series is picked by prefix.
#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(flatten)]
    notice: ApiNotice,
    #[serde(flatten)]
    fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SeriesBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: Option<String>,
}

/// OVERVIEW response for company fundamentals
#[derive(Debug, Deserialize)]
struct CompanyOverviewResponse {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "AssetType")]
    asset_type: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
    #[serde(rename = "Currency")]
    currency: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_capitalization: Option<String>,
    #[serde(rename = "PERatio")]
    pe_ratio: Option<String>,
    #[serde(rename = "TrailingPE")]
    trailing_pe: Option<String>,
    #[serde(rename = "EPS")]
    eps: Option<String>,
    #[serde(rename = "DividendYield")]
    dividend_yield: Option<String>,
    #[serde(rename = "Beta")]
    beta: Option<String>,
    #[serde(rename = "52WeekHigh")]
    week_52_high: Option<String>,
    #[serde(rename = "52WeekLow")]
    week_52_low: Option<String>,
    #[serde(flatten)]
    notice: ApiNotice,
}

impl CompanyOverviewResponse {
    fn into_overview(self) -> Result<RawOverview, MarketDataError> {
        let symbol = non_empty(&self.symbol)
            .ok_or_else(|| MarketDataError::NotFound("No overview data".to_string()))?;

        Ok(RawOverview {
            symbol,
            name: non_empty(&self.name),
            asset_type: non_empty(&self.asset_type),
            description: non_empty(&self.description),
            sector: non_empty(&self.sector),
            industry: non_empty(&self.industry),
            country: non_empty(&self.country),
            currency: non_empty(&self.currency),
            exchange: non_empty(&self.exchange),
            market_cap: parse_opt_decimal(&self.market_capitalization),
            pe_ratio: parse_opt_decimal(&self.pe_ratio)
                .or_else(|| parse_opt_decimal(&self.trailing_pe)),
            eps: parse_opt_decimal(&self.eps),
            dividend_yield: parse_opt_decimal(&self.dividend_yield),
            beta: parse_opt_decimal(&self.beta),
            week_52_high: parse_opt_decimal(&self.week_52_high),
            week_52_low: parse_opt_decimal(&self.week_52_low),
        })
    }
}

// ============================================================================
// AlphaVantageProvider implementation
// ============================================================================

impl AlphaVantageProvider {
    /// Create a new Alpha Vantage provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    /// Make a request to the Alpha Vantage API.
    async fn fetch(
        &self,
        symbol: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("apikey", &self.api_key));

        let url = reqwest::Url::parse_with_params(BASE_URL, &all_params).map_err(|e| {
            MarketDataError::Network {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to build URL: {}", e),
            }
        })?;

        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(&self.api_key, "***")
        );

        send_text(PROVIDER_ID, symbol, self.client.get(url)).await
    }

    /// Classify API-level notices carried in a 200 response.
    fn check_api_error(symbol: &str, notice: &ApiNotice) -> Result<(), MarketDataError> {
        if let Some(ref msg) = notice.error_message {
            let lower = msg.to_lowercase();
            if lower.contains("apikey") || lower.contains("api key") {
                return Err(MarketDataError::Auth {
                    provider: PROVIDER_ID.to_string(),
                    message: msg.clone(),
                });
            }
            if msg.contains("Invalid API call") || lower.contains("not found") {
                return Err(MarketDataError::NotFound(symbol.to_string()));
            }
            return Err(MarketDataError::DataInvalid {
                provider: PROVIDER_ID.to_string(),
                message: msg.clone(),
            });
        }

        // "Note" and "Information" both carry throttling messages
        for msg in [&notice.note, &notice.information].into_iter().flatten() {
            let lower = msg.to_lowercase();
            if lower.contains("call frequency") || lower.contains("rate limit") {
                return Err(MarketDataError::RateLimited {
                    provider: PROVIDER_ID.to_string(),
                    retry_after: Some(THROTTLE_COOLDOWN),
                });
            }
            if lower.contains("premium") {
                return Err(MarketDataError::NotSupported {
                    operation: "premium endpoint".to_string(),
                    provider: PROVIDER_ID.to_string(),
                });
            }
            if lower.contains("api key") || lower.contains("apikey") {
                return Err(MarketDataError::Auth {
                    provider: PROVIDER_ID.to_string(),
                    message: msg.clone(),
                });
            }
            warn!("Alpha Vantage notice: {}", msg);
        }

        Ok(())
    }

    fn parse_quote(symbol: &str, text: &str) -> Result<RawQuote, MarketDataError> {
        let response: GlobalQuoteResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;
        Self::check_api_error(symbol, &response.notice)?;

        // An unknown symbol yields an empty "Global Quote" object
        let quote = response
            .quote
            .filter(|q| q.symbol.is_some())
            .ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))?;

        let price = parse_opt_decimal(&quote.price).ok_or_else(|| MarketDataError::DataInvalid {
            provider: PROVIDER_ID.to_string(),
            message: format!("Missing price for {}", symbol),
        })?;

        let as_of = quote
            .latest_trading_day
            .as_deref()
            .and_then(Self::parse_date)
            .unwrap_or_else(Utc::now);

        let mut raw = RawQuote::new(quote.symbol.unwrap_or_default(), price, as_of);
        raw.open = parse_opt_decimal(&quote.open);
        raw.high = parse_opt_decimal(&quote.high);
        raw.low = parse_opt_decimal(&quote.low);
        raw.close = Some(price);
        raw.volume = parse_opt_decimal(&quote.volume);
        Ok(raw)
    }

    fn parse_series(
        symbol: &str,
        interval: &str,
        text: &str,
    ) -> Result<RawSeries, MarketDataError> {
        let response: TimeSeriesResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;
        Self::check_api_error(symbol, &response.notice)?;

        let series = response
            .fields
            .into_iter()
            .find(|(key, _)| key.starts_with("Time Series"))
            .map(|(_, value)| value)
            .ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))?;

        let bars: BTreeMap<String, SeriesBar> =
            serde_json::from_value(series).map_err(|e| parse_error(PROVIDER_ID, e))?;

        let bars = bars
            .into_iter()
            .filter_map(|(stamp, bar)| {
                Some(Bar {
                    timestamp: Self::parse_timestamp(&stamp)?,
                    open: parse_decimal(&bar.open)?,
                    high: parse_decimal(&bar.high)?,
                    low: parse_decimal(&bar.low)?,
                    close: parse_decimal(&bar.close)?,
                    volume: bar.volume.as_deref().and_then(parse_decimal),
                })
            })
            .collect();

        Ok(RawSeries::new(symbol, interval, bars))
    }

    /// Parse a date string in YYYY-MM-DD format to DateTime<Utc>.
    fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Daily keys are dates; intraday keys carry a time in exchange-local
    /// wall time, kept as-is.
    fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc())
            .or_else(|| Self::parse_date(stamp))
    }
}

#[async_trait]
impl ProviderClient for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn default_limits(&self) -> RateLimitConfig {
        default_limits()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
        let text = self
            .fetch(symbol, &[("function", "GLOBAL_QUOTE"), ("symbol", symbol)])
            .await?;
        Self::parse_quote(symbol, &text)
    }

    async fn fetch_daily_series(
        &self,
        symbol: &str,
        size: SeriesSize,
    ) -> Result<RawSeries, MarketDataError> {
        let params = [
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("outputsize", size.as_str()),
        ];
        let text = self.fetch(symbol, &params).await?;
        Self::parse_series(symbol, "1d", &text)
    }

    async fn fetch_intraday_series(
        &self,
        symbol: &str,
        interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        let params = [
            ("function", "TIME_SERIES_INTRADAY"),
            ("symbol", symbol),
            ("interval", interval.as_str()),
            ("outputsize", "compact"),
        ];
        let text = self.fetch(symbol, &params).await?;
        Self::parse_series(symbol, interval.as_str(), &text)
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<RawOverview, MarketDataError> {
        let text = self
            .fetch(symbol, &[("function", "OVERVIEW"), ("symbol", symbol)])
            .await?;
        let response: CompanyOverviewResponse =
            serde_json::from_str(&text).map_err(|e| parse_error(PROVIDER_ID, e))?;
        Self::check_api_error(symbol, &response.notice)?;
        response.into_overview()
    }
}
