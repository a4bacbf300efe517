use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::selection::SelectionMetadata;
use super::types::ProviderId;

/// Latest quote as reported by one provider, already mapped out of the
/// provider's own response shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    /// Symbol echoed back by the provider
    pub symbol: String,

    /// Current/last trade price (required)
    pub price: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,

    /// Close of the latest session (previous close for some providers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    /// Provider timestamp of the quote
    pub as_of: DateTime<Utc>,

    /// Set when the provider embedded an error/status notice in an
    /// otherwise parseable response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_flag: Option<String>,
}

impl RawQuote {
    /// Create a quote with only the required fields.
    pub fn new(symbol: impl Into<String>, price: Decimal, as_of: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            currency: None,
            exchange: None,
            as_of,
            error_flag: None,
        }
    }

    /// Build the caller-facing snapshot. Every numeric field is copied from
    /// this single response.
    pub fn into_snapshot(
        self,
        source: ProviderId,
        stale: bool,
        selection: SelectionMetadata,
    ) -> MarketSnapshot {
        MarketSnapshot {
            symbol: self.symbol,
            price: self.price,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            currency: self.currency,
            exchange: self.exchange,
            as_of: self.as_of,
            source: source.into_owned(),
            stale,
            selection,
        }
    }
}

/// Normalized point-in-time market data for one symbol from one provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub as_of: DateTime<Utc>,

    /// Provider the numeric fields came from (YAHOO, ALPHA_VANTAGE, ...)
    pub source: String,

    /// True when served from an expired cache entry after every provider failed
    pub stale: bool,

    /// How the source was chosen. Never used to compute the fields above.
    pub selection: SelectionMetadata,
}
