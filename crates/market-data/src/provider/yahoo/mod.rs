//! Yahoo Finance market data provider.
//!
//! Quotes and bars come from the chart API through `yahoo_finance_api`.
//! Company overviews come from the quoteSummary API, which needs a
//! cookie/crumb pair fetched once and reused until Yahoo rejects it.

mod models;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use num_traits::FromPrimitive;
use reqwest::{header, Client, StatusCode, Url};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use yahoo_finance_api as yahoo;

use crate::errors::MarketDataError;
use crate::models::{Bar, IntradayInterval, RawOverview, RawQuote, RawSeries, SeriesSize};
use crate::provider::http::{build_client, f64_to_decimal, parse_error, transport_error};
use crate::provider::ProviderClient;
use crate::registry::RateLimitConfig;

use models::{QuoteSummaryResponse, QuoteSummaryResult, RawValue};

pub(crate) const PROVIDER_ID: &str = "YAHOO";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary/";

/// Calendar days fetched for a compact daily series (~100 trading days).
const COMPACT_DAYS: i64 = 150;

/// Calendar days fetched for a full daily series.
const FULL_DAYS: i64 = 20 * 365;

/// Unofficial API: stay at one call per second on average, short bursts allowed.
pub(crate) fn default_limits() -> RateLimitConfig {
    RateLimitConfig {
        max_per_window: 60,
        window: Duration::from_secs(60),
        burst_limit: 10,
        burst_window: Duration::from_secs(1),
        min_interval: Duration::ZERO,
    }
}

#[derive(Debug, Clone)]
struct Crumb {
    cookie: String,
    crumb: String,
}

/// Yahoo Finance market data provider.
///
/// No API key is needed.
pub struct YahooProvider {
    connector: yahoo::YahooConnector,
    client: Client,
    crumb: RwLock<Option<Crumb>>,
}

impl YahooProvider {
    /// Create a new Yahoo Finance provider.
    pub fn new() -> Result<Self, MarketDataError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| {
            MarketDataError::Config(format!("Failed to initialize Yahoo connector: {}", e))
        })?;
        Ok(Self {
            connector,
            client: build_client(),
            crumb: RwLock::new(None),
        })
    }

    fn map_yahoo_error(symbol: &str, error: yahoo::YahooError) -> MarketDataError {
        if matches!(error, yahoo::YahooError::NoQuotes | yahoo::YahooError::NoResult) {
            return MarketDataError::NotFound(symbol.to_string());
        }

        let message = error.to_string();
        if message.contains("429") || message.contains("Too Many Requests") {
            MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: None,
            }
        } else {
            MarketDataError::Network {
                provider: PROVIDER_ID.to_string(),
                message,
            }
        }
    }

    fn to_offset_datetime(dt: DateTime<Utc>) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(dt.timestamp())
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    /// Convert a chart-API quote into a bar; `None` when the timestamp or
    /// close price is unusable.
    fn to_bar(quote: &yahoo::Quote) -> Option<Bar> {
        let timestamp = Utc.timestamp_opt(quote.timestamp as i64, 0).single()?;
        let close = f64_to_decimal(quote.close)?;

        Some(Bar {
            timestamp,
            open: f64_to_decimal(quote.open).unwrap_or(close),
            high: f64_to_decimal(quote.high).unwrap_or(close),
            low: f64_to_decimal(quote.low).unwrap_or(close),
            close,
            volume: Decimal::from_u64(quote.volume),
        })
    }

    fn to_series(
        symbol: &str,
        interval: &str,
        response: yahoo::YResponse,
    ) -> Result<RawSeries, MarketDataError> {
        let quotes = response
            .quotes()
            .map_err(|e| Self::map_yahoo_error(symbol, e))?;

        let total = quotes.len();
        let bars: Vec<Bar> = quotes.iter().filter_map(Self::to_bar).collect();
        if bars.len() < total {
            warn!(
                "Skipped {} unconvertible Yahoo bar(s) for {}",
                total - bars.len(),
                symbol
            );
        }

        Ok(RawSeries::new(symbol, interval, bars))
    }

    // ------------------------------------------------------------------
    // quoteSummary
    // ------------------------------------------------------------------

    async fn ensure_crumb(&self) -> Result<Crumb, MarketDataError> {
        if let Some(crumb) = self.crumb.read().await.as_ref() {
            return Ok(crumb.clone());
        }

        let crumb = self.fetch_crumb().await?;
        *self.crumb.write().await = Some(crumb.clone());
        Ok(crumb)
    }

    async fn fetch_crumb(&self) -> Result<Crumb, MarketDataError> {
        debug!("Fetching Yahoo crumb");

        let response = self
            .client
            .get(COOKIE_URL)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| MarketDataError::Network {
                provider: PROVIDER_ID.to_string(),
                message: "Failed to parse Yahoo cookie".to_string(),
            })?;

        let crumb = self
            .client
            .get(CRUMB_URL)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?
            .text()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        Ok(Crumb { cookie, crumb })
    }

    fn quote_summary_url(symbol: &str, crumb: &str) -> Result<Url, MarketDataError> {
        let mut url = Url::parse(QUOTE_SUMMARY_URL)
            .map_err(|e| MarketDataError::Config(format!("Bad Yahoo URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| MarketDataError::Config("Bad Yahoo URL".to_string()))?
            .pop_if_empty()
            .push(symbol);
        url.query_pairs_mut()
            .append_pair(
                "modules",
                "price,summaryProfile,summaryDetail,defaultKeyStatistics",
            )
            .append_pair("crumb", crumb);
        Ok(url)
    }

    fn parse_overview(symbol: &str, text: &str) -> Result<RawOverview, MarketDataError> {
        let response: QuoteSummaryResponse =
            serde_json::from_str(text).map_err(|e| parse_error(PROVIDER_ID, e))?;

        let result = response
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))?;

        Ok(Self::map_summary(symbol, &result))
    }

    fn map_summary(symbol: &str, result: &QuoteSummaryResult) -> RawOverview {
        let price = result.price.as_ref();
        let profile = result.summary_profile.as_ref();
        let detail = result.summary_detail.as_ref();
        let stats = result.default_key_statistics.as_ref();

        let quote_type = price
            .and_then(|p| p.quote_type.as_deref())
            .unwrap_or("");
        let decimal = |value: Option<f64>| value.and_then(f64_to_decimal);

        RawOverview {
            symbol: price
                .and_then(|p| p.symbol.clone())
                .unwrap_or_else(|| symbol.to_string()),
            name: Some(format_name(
                price.and_then(|p| p.long_name.as_deref()),
                quote_type,
                price.and_then(|p| p.short_name.as_deref()),
                symbol,
            )),
            asset_type: (!quote_type.is_empty()).then(|| quote_type.to_uppercase()),
            description: profile.and_then(|p| p.long_business_summary.clone()),
            sector: profile.and_then(|p| p.sector.as_deref()).map(format_sector),
            industry: profile.and_then(|p| p.industry.clone()),
            country: profile.and_then(|p| p.country.clone()),
            currency: price.and_then(|p| p.currency.clone()),
            exchange: price.and_then(|p| p.exchange_name.clone()),
            market_cap: decimal(detail.and_then(|d| RawValue::of(&d.market_cap))),
            pe_ratio: decimal(detail.and_then(|d| RawValue::of(&d.trailing_pe))),
            eps: decimal(stats.and_then(|s| RawValue::of(&s.trailing_eps))),
            dividend_yield: decimal(detail.and_then(|d| RawValue::of(&d.dividend_yield))),
            beta: decimal(detail.and_then(|d| RawValue::of(&d.beta))),
            week_52_high: decimal(detail.and_then(|d| RawValue::of(&d.fifty_two_week_high))),
            week_52_low: decimal(detail.and_then(|d| RawValue::of(&d.fifty_two_week_low))),
        }
    }
}

#[async_trait]
impl ProviderClient for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn default_limits(&self) -> RateLimitConfig {
        default_limits()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, MarketDataError> {
        debug!("Fetching latest quote for {} from Yahoo", symbol);

        let response = self
            .connector
            .get_latest_quotes(symbol, "1d")
            .await
            .map_err(|e| Self::map_yahoo_error(symbol, e))?;

        let quote = response.last_quote().map_err(|e| {
            warn!("No quotes returned for {}: {}", symbol, e);
            MarketDataError::NotFound(symbol.to_string())
        })?;

        let bar = Self::to_bar(&quote).ok_or_else(|| MarketDataError::DataInvalid {
            provider: PROVIDER_ID.to_string(),
            message: format!("Unusable quote for {}", symbol),
        })?;

        let mut raw = RawQuote::new(symbol, bar.close, bar.timestamp);
        raw.open = Some(bar.open);
        raw.high = Some(bar.high);
        raw.low = Some(bar.low);
        raw.close = Some(bar.close);
        raw.volume = bar.volume;
        Ok(raw)
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
        let end = Utc::now();
        let start = end - chrono::Duration::days(days);

        debug!(
            "Fetching daily history for {} from {} to {} from Yahoo",
            symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let response = self
            .connector
            .get_quote_history(
                symbol,
                Self::to_offset_datetime(start),
                Self::to_offset_datetime(end),
            )
            .await
            .map_err(|e| Self::map_yahoo_error(symbol, e))?;

        Self::to_series(symbol, "1d", response)
    }

    async fn fetch_intraday_series(
        &self,
        symbol: &str,
        interval: IntradayInterval,
    ) -> Result<RawSeries, MarketDataError> {
        // One-minute bars are only served for short ranges
        let (yahoo_interval, range) = match interval {
            IntradayInterval::OneMinute => ("1m", "1d"),
            IntradayInterval::FiveMinutes => ("5m", "5d"),
            IntradayInterval::FifteenMinutes => ("15m", "5d"),
            IntradayInterval::ThirtyMinutes => ("30m", "5d"),
            IntradayInterval::SixtyMinutes => ("60m", "5d"),
        };

        let response = self
            .connector
            .get_quote_range(symbol, yahoo_interval, range)
            .await
            .map_err(|e| Self::map_yahoo_error(symbol, e))?;

        Self::to_series(symbol, interval.as_str(), response)
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<RawOverview, MarketDataError> {
        debug!("Fetching quoteSummary for {} from Yahoo", symbol);

        let crumb = self.ensure_crumb().await?;
        let url = Self::quote_summary_url(symbol, &crumb.crumb)?;

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        match response.status() {
            // Stale crumb: drop it so the retry fetches a new one
            StatusCode::UNAUTHORIZED => {
                *self.crumb.write().await = None;
                Err(MarketDataError::Network {
                    provider: PROVIDER_ID.to_string(),
                    message: "Yahoo crumb expired".to_string(),
                })
            }
            StatusCode::NOT_FOUND => Err(MarketDataError::NotFound(symbol.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
                retry_after: None,
            }),
            status if !status.is_success() => Err(MarketDataError::Network {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {}", status),
            }),
            _ => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| transport_error(PROVIDER_ID, e))?;
                Self::parse_overview(symbol, &text)
            }
        }
    }
}

/// Clean up fund names by removing common issuer prefixes.
fn format_name(
    long_name: Option<&str>,
    quote_type: &str,
    short_name: Option<&str>,
    symbol: &str,
) -> String {
    let mut name = long_name.unwrap_or("").to_string();

    if !name.is_empty() {
        let replacements = [
            ("&amp;", "&"),
            ("iShares III Public Limited Company - ", ""),
            ("iShares VII PLC - ", ""),
            ("Vanguard Funds Public Limited Company - ", ""),
            ("Vanguard Index Funds - ", ""),
            ("Xtrackers (IE) Plc - ", ""),
        ];

        for (from, to) in &replacements {
            name = name.replace(from, to);
        }
    }

    // Futures short names end with a date suffix
    if quote_type.eq_ignore_ascii_case("FUTURE") {
        if let Some(sn) = short_name {
            if sn.len() >= 7 && sn.is_char_boundary(sn.len() - 7) {
                return sn[..sn.len() - 7].to_string();
            }
        }
    }

    if name.is_empty() {
        short_name.unwrap_or(symbol).to_string()
    } else {
        name
    }
}

/// snake_case sector to Title Case.
fn format_sector(sector: &str) -> String {
    sector
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_name() {
        assert_eq!(
            format_name(
                Some("iShares VII PLC - iShares Core S&P 500"),
                "ETF",
                None,
                "CSPX.L"
            ),
            "iShares Core S&P 500"
        );
        assert_eq!(
            format_name(Some("Procter &amp; Gamble"), "EQUITY", None, "PG"),
            "Procter & Gamble"
        );
        assert_eq!(format_name(None, "EQUITY", Some("Apple"), "AAPL"), "Apple");
        assert_eq!(format_name(None, "EQUITY", None, "AAPL"), "AAPL");
    }

    #[test]
    fn test_format_sector() {
        assert_eq!(format_sector("technology"), "Technology");
        assert_eq!(format_sector("basic_materials"), "Basic Materials");
    }

    #[test]
    fn test_parse_overview() {
        let json = r#"{"quoteSummary": {"result": [{
            "price": {
                "symbol": "AAPL",
                "currency": "USD",
                "exchangeName": "NasdaqGS",
                "shortName": "Apple Inc.",
                "longName": "Apple Inc.",
                "quoteType": "EQUITY"
            },
            "summaryProfile": {
                "sector": "Technology",
                "industry": "Consumer Electronics",
                "country": "United States"
            },
            "summaryDetail": {
                "marketCap": {"raw": 2800000000000, "fmt": "2.8T"},
                "trailingPE": {"raw": 28.5, "fmt": "28.50"},
                "dividendYield": {},
                "beta": {"raw": 1.25, "fmt": "1.25"}
            },
            "defaultKeyStatistics": {
                "trailingEps": {"raw": 6.42, "fmt": "6.42"}
            }
        }], "error": null}}"#;

        let overview = YahooProvider::parse_overview("AAPL", json).unwrap();
        assert_eq!(overview.name.as_deref(), Some("Apple Inc."));
        assert_eq!(overview.asset_type.as_deref(), Some("EQUITY"));
        assert_eq!(overview.exchange.as_deref(), Some("NasdaqGS"));
        assert_eq!(overview.sector.as_deref(), Some("Technology"));
        assert_eq!(overview.market_cap, Some(dec!(2800000000000)));
        assert_eq!(overview.beta, Some(dec!(1.25)));
        assert_eq!(overview.eps, Some(dec!(6.42)));
        assert!(overview.dividend_yield.is_none());
    }

    #[test]
    fn test_parse_overview_without_result() {
        let json = r#"{"quoteSummary": {"result": null, "error": {"code": "Not Found"}}}"#;
        assert!(matches!(
            YahooProvider::parse_overview("NOPE", json),
            Err(MarketDataError::NotFound(_))
        ));
    }

    #[test]
    fn test_quote_summary_url_encodes_symbol() {
        let url = YahooProvider::quote_summary_url("EURUSD=X", "abc/def").unwrap();
        let text = url.as_str();
        assert!(text.starts_with(QUOTE_SUMMARY_URL));
        assert!(text.contains("EURUSD=X?") || text.contains("EURUSD%3DX?"));
        assert!(text.contains("crumb=abc%2Fdef"));
    }

    #[test]
    fn test_to_bar_keeps_short_prices() {
        let quote = yahoo::Quote {
            timestamp: 1_709_251_200,
            open: 179.55,
            high: 180.53,
            low: 177.38,
            volume: 73_488_000,
            close: 179.66,
            adjclose: 179.66,
        };

        let bar = YahooProvider::to_bar(&quote).unwrap();
        assert_eq!(bar.open, dec!(179.55));
        assert_eq!(bar.high, dec!(180.53));
        assert_eq!(bar.low, dec!(177.38));
        assert_eq!(bar.close, dec!(179.66));
        assert_eq!(bar.close.to_string(), "179.66");
        assert_eq!(bar.volume, Some(dec!(73488000)));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            YahooProvider::map_yahoo_error("NOPE", yahoo::YahooError::NoQuotes),
            MarketDataError::NotFound(_)
        ));
        assert!(matches!(
            YahooProvider::map_yahoo_error("NOPE", yahoo::YahooError::NoResult),
            MarketDataError::NotFound(_)
        ));
    }
}
