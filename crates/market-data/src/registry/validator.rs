//! Provider response validation.
//!
//! A response must pass validation before it can be selected:
//! - the symbol matches the request
//! - prices are positive and below a sanity ceiling
//! - no provider error flag is set
//!
//! Series bars that fail the price checks are dropped individually; the
//! series is rejected only when nothing usable remains.

use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;
use crate::models::{Bar, Payload, RawOverview, RawQuote, RawSeries};

/// Validator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Maximum plausible price (exclusive).
    pub max_price: Decimal,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_price: Decimal::from(1_000_000_000i64), // 1 billion as sanity check
        }
    }
}

/// Validates normalized provider payloads.
pub struct PayloadValidator {
    config: ValidatorConfig,
}

impl PayloadValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::with_config(ValidatorConfig::default())
    }

    /// Create a validator with custom configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a payload returned for `symbol`.
    ///
    /// Returns the payload, possibly with invalid series bars removed, or a
    /// `DataInvalid` error naming the provider.
    pub fn validate(
        &self,
        provider: &str,
        symbol: &str,
        payload: Payload,
    ) -> Result<Payload, MarketDataError> {
        let invalid = |message: String| MarketDataError::DataInvalid {
            provider: provider.to_string(),
            message,
        };

        if !payload.symbol().eq_ignore_ascii_case(symbol) {
            return Err(invalid(format!(
                "Symbol mismatch: requested {}, got {}",
                symbol,
                payload.symbol()
            )));
        }

        match payload {
            Payload::Quote(quote) => {
                self.validate_quote(&quote).map_err(invalid)?;
                Ok(Payload::Quote(quote))
            }
            Payload::Series(series) => self
                .validate_series(provider, series)
                .map(Payload::Series)
                .map_err(invalid),
            Payload::Overview(overview) => {
                Self::validate_overview(&overview).map_err(invalid)?;
                Ok(Payload::Overview(overview))
            }
        }
    }

    fn validate_quote(&self, quote: &RawQuote) -> Result<(), String> {
        if let Some(flag) = &quote.error_flag {
            return Err(format!("Provider error flag: {}", flag));
        }
        self.check_price("Price", quote.price)?;

        // Optional fields are checked only when present
        for (label, value) in [
            ("Open", quote.open),
            ("High", quote.high),
            ("Low", quote.low),
            ("Close", quote.close),
        ] {
            if let Some(value) = value {
                self.check_price(label, value)?;
            }
        }

        if let (Some(high), Some(low)) = (quote.high, quote.low) {
            if high < low {
                return Err(format!("High ({}) is less than Low ({})", high, low));
            }
        }

        if quote.volume.is_some_and(|v| v < Decimal::ZERO) {
            return Err("Negative volume".to_string());
        }

        Ok(())
    }

    fn validate_series(&self, provider: &str, mut series: RawSeries) -> Result<RawSeries, String> {
        let before = series.bars.len();
        series.bars.retain(|bar| self.bar_is_valid(bar));
        let dropped = before - series.bars.len();

        if dropped > 0 {
            warn!(
                "Dropped {} invalid bar(s) for {} from {}",
                dropped, series.symbol, provider
            );
        }

        if series.bars.is_empty() {
            return Err(if before == 0 {
                "Empty series".to_string()
            } else {
                format!("All {} bars failed validation", before)
            });
        }

        Ok(series)
    }

    fn bar_is_valid(&self, bar: &Bar) -> bool {
        [bar.open, bar.high, bar.low, bar.close]
            .iter()
            .all(|price| self.check_price("", *price).is_ok())
            && bar.high >= bar.low
            && bar.volume.map_or(true, |v| v >= Decimal::ZERO)
    }

    fn validate_overview(overview: &RawOverview) -> Result<(), String> {
        // An overview with no descriptive fields at all is an empty response
        if overview.name.is_none()
            && overview.sector.is_none()
            && overview.industry.is_none()
            && overview.market_cap.is_none()
        {
            return Err("Empty overview".to_string());
        }
        Ok(())
    }

    fn check_price(&self, label: &str, price: Decimal) -> Result<(), String> {
        if price <= Decimal::ZERO {
            return Err(format!("{} is not positive: {}", label, price));
        }
        if price >= self.config.max_price {
            return Err(format!(
                "{} ({}) exceeds max threshold ({})",
                label, price, self.config.max_price
            ));
        }
        Ok(())
    }
}

impl Default for PayloadValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, price: Decimal) -> Payload {
        Payload::Quote(RawQuote::new(symbol, price, Utc::now()))
    }

    fn bar(day: u32, close: Decimal) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Some(dec!(1000)),
        }
    }

    fn is_data_invalid(result: Result<Payload, MarketDataError>) -> bool {
        matches!(result, Err(MarketDataError::DataInvalid { .. }))
    }

    #[test]
    fn test_valid_quote() {
        let validator = PayloadValidator::new();
        let result = validator.validate("YAHOO", "AAPL", quote("AAPL", dec!(150.20)));
        assert!(result.is_ok());
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let validator = PayloadValidator::new();
        assert!(is_data_invalid(validator.validate(
            "YAHOO",
            "AAPL",
            quote("MSFT", dec!(150))
        )));
    }

    #[test]
    fn test_symbol_match_ignores_case() {
        let validator = PayloadValidator::new();
        assert!(validator
            .validate("YAHOO", "AAPL", quote("aapl", dec!(150)))
            .is_ok());
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let validator = PayloadValidator::new();
        assert!(is_data_invalid(validator.validate("P", "AAPL", quote("AAPL", dec!(0)))));
        assert!(is_data_invalid(validator.validate("P", "AAPL", quote("AAPL", dec!(-1)))));
    }

    #[test]
    fn test_price_above_ceiling_rejected() {
        let validator = PayloadValidator::with_config(ValidatorConfig {
            max_price: dec!(10000),
        });
        assert!(is_data_invalid(validator.validate(
            "P",
            "AAPL",
            quote("AAPL", dec!(10000))
        )));
        assert!(validator.validate("P", "AAPL", quote("AAPL", dec!(9999.99))).is_ok());
    }

    #[test]
    fn test_error_flag_rejected() {
        let validator = PayloadValidator::new();
        let mut raw = RawQuote::new("AAPL", dec!(150), Utc::now());
        raw.error_flag = Some("delisted".to_string());

        let err = validator
            .validate("P", "AAPL", Payload::Quote(raw))
            .unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_high_below_low_rejected() {
        let validator = PayloadValidator::new();
        let mut raw = RawQuote::new("AAPL", dec!(150), Utc::now());
        raw.high = Some(dec!(140));
        raw.low = Some(dec!(145));

        assert!(is_data_invalid(validator.validate("P", "AAPL", Payload::Quote(raw))));
    }

    #[test]
    fn test_series_drops_invalid_bars() {
        let validator = PayloadValidator::new();
        let series = RawSeries::new(
            "AAPL",
            "1d",
            vec![bar(2, dec!(100)), bar(3, dec!(0)), bar(4, dec!(102))],
        );

        let result = validator
            .validate("P", "AAPL", Payload::Series(series))
            .unwrap();
        match result {
            Payload::Series(series) => {
                assert_eq!(series.bars.len(), 2);
                assert_eq!(series.bars[1].close, dec!(102));
            }
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_series_with_no_valid_bars_rejected() {
        let validator = PayloadValidator::new();
        let series = RawSeries::new("AAPL", "1d", vec![bar(2, dec!(0)), bar(3, dec!(-5))]);
        assert!(is_data_invalid(validator.validate("P", "AAPL", Payload::Series(series))));

        let empty = RawSeries::new("AAPL", "1d", Vec::new());
        assert!(is_data_invalid(validator.validate("P", "AAPL", Payload::Series(empty))));
    }

    #[test]
    fn test_overview_requires_some_content() {
        let validator = PayloadValidator::new();
        let empty = RawOverview::new("AAPL");
        assert!(is_data_invalid(validator.validate("P", "AAPL", Payload::Overview(empty))));

        let filled = RawOverview::new("AAPL").name("Apple Inc.").sector("Technology");
        assert!(validator.validate("P", "AAPL", Payload::Overview(filled)).is_ok());
    }
}
