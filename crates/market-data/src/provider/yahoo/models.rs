//! Yahoo Finance quoteSummary response models.
//!
//! Numeric fields arrive as `{"raw": 123.45, "fmt": "123.45"}`, or as `{}`
//! when Yahoo has no value.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummaryResponse {
    pub quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
pub struct QuoteSummary {
    pub result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummaryResult {
    pub price: Option<PriceModule>,
    pub summary_profile: Option<SummaryProfile>,
    pub summary_detail: Option<SummaryDetail>,
    pub default_key_statistics: Option<KeyStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceModule {
    pub symbol: Option<String>,
    pub currency: Option<String>,
    pub exchange_name: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub quote_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RawValue {
    pub raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryProfile {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub long_business_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDetail {
    pub market_cap: Option<RawValue>,
    #[serde(rename = "trailingPE")]
    pub trailing_pe: Option<RawValue>,
    pub dividend_yield: Option<RawValue>,
    pub beta: Option<RawValue>,
    pub fifty_two_week_high: Option<RawValue>,
    pub fifty_two_week_low: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatistics {
    pub trailing_eps: Option<RawValue>,
}

impl RawValue {
    /// Flatten `Option<RawValue>` into the raw number.
    pub fn of(value: &Option<RawValue>) -> Option<f64> {
        value.and_then(|v| v.raw)
    }
}
