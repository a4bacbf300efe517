//! HTTP plumbing shared by the REST adapters.
//!
//! Every adapter maps transport failures and HTTP status codes the same way:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | 401 / 403 | `Auth` |
//! | 404 | `NotFound` |
//! | 429 | `RateLimited` (with `Retry-After` when sent) |
//! | 5xx, other non-success | `Network` |
//! | request timeout | `Timeout` |
//! | connect / body errors | `Network` |

use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;

use crate::errors::MarketDataError;

/// Per-request timeout for adapter HTTP clients.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send a request and return the body of a successful response.
pub(crate) async fn send_text(
    provider: &str,
    symbol: &str,
    request: RequestBuilder,
) -> Result<String, MarketDataError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, symbol, status, retry_after, &body));
    }

    response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))
}

pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> MarketDataError {
    if error.is_timeout() {
        MarketDataError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        MarketDataError::Network {
            provider: provider.to_string(),
            message: error.to_string(),
        }
    }
}

pub(crate) fn status_error(
    provider: &str,
    symbol: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> MarketDataError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MarketDataError::Auth {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
        StatusCode::NOT_FOUND => MarketDataError::NotFound(symbol.to_string()),
        StatusCode::TOO_MANY_REQUESTS => MarketDataError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        _ => MarketDataError::Network {
            provider: provider.to_string(),
            message: format!("HTTP {} - {}", status, truncate(body, 200)),
        },
    }
}

/// `Retry-After` in delta-seconds form.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn parse_error(provider: &str, error: impl std::fmt::Display) -> MarketDataError {
    MarketDataError::DataInvalid {
        provider: provider.to_string(),
        message: format!("Failed to parse response: {}", error),
    }
}

/// Parse a numeric string, treating provider placeholders as missing.
pub(crate) fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim().trim_end_matches('%');
    if trimmed.is_empty() || trimmed == "None" || trimmed == "-" {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Convert a JSON float using its shortest round-trip form, so 6.42
/// stays 6.42. Non-finite values are missing.
pub(crate) fn f64_to_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok()
}

pub(crate) fn parse_opt_decimal(value: &Option<String>) -> Option<Decimal> {
    value.as_deref().and_then(parse_decimal)
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "None" && *v != "-")
        .map(str::to_string)
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("P", "AAPL", StatusCode::UNAUTHORIZED, None, ""),
            MarketDataError::Auth { .. }
        ));
        assert!(matches!(
            status_error("P", "AAPL", StatusCode::FORBIDDEN, None, ""),
            MarketDataError::Auth { .. }
        ));
        assert!(matches!(
            status_error("P", "AAPL", StatusCode::NOT_FOUND, None, ""),
            MarketDataError::NotFound(ref s) if s == "AAPL"
        ));
        assert!(matches!(
            status_error("P", "AAPL", StatusCode::BAD_GATEWAY, None, "upstream"),
            MarketDataError::Network { .. }
        ));

        let limited = status_error(
            "P",
            "AAPL",
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(20)),
            "",
        );
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_f64_to_decimal_drops_binary_noise() {
        assert_eq!(f64_to_decimal(6.42), Some(dec!(6.42)));
        assert_eq!(f64_to_decimal(0.1 + 0.2).map(|d| d.round_dp(10)), Some(dec!(0.3)));
        assert_eq!(f64_to_decimal(f64::NAN), None);
    }

    #[test]
    fn test_parse_decimal_placeholders() {
        assert_eq!(parse_decimal("189.8400"), Some(dec!(189.8400)));
        assert_eq!(parse_decimal("0.52%"), Some(dec!(0.52)));
        assert_eq!(parse_decimal("None"), None);
        assert_eq!(parse_decimal("-"), None);
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("1.5E3"), Some(dec!(1500)));
    }
}
