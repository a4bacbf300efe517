use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (midnight UTC for daily bars)
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Price series as reported by one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    /// Symbol echoed back by the provider
    pub symbol: String,

    /// Bar interval label ("1d", "5min", ...)
    pub interval: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Bars ordered by timestamp ascending
    pub bars: Vec<Bar>,
}

impl RawSeries {
    /// Create a series, sorting the bars by timestamp.
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            currency: None,
            bars,
        }
    }

    pub fn with_currency(mut self, currency: Option<String>) -> Self {
        self.currency = currency;
        self
    }

    /// Most recent bar, if any.
    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// How much daily history to request from a provider.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesSize {
    /// Roughly the latest 100 trading days
    #[default]
    Compact,
    /// Full available history
    Full,
}

impl SeriesSize {
    /// Number of trading days a compact response is expected to cover.
    pub const COMPACT_TRADING_DAYS: i64 = 100;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Full => "full",
        }
    }
}

/// Intraday bar interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntradayInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl IntradayInterval {
    /// Interval label in the "5min" form used by most providers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::SixtyMinutes => "60min",
        }
    }
}

/// Inclusive calendar date range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    /// Create a range; the bounds are swapped if given in reverse.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The last `days` calendar days up to and including today (UTC).
    ///
    /// Spans reaching past the earliest representable date start there.
    pub fn last_days(days: u32) -> Self {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let date = timestamp.date_naive();
        date >= self.start && date <= self.end
    }

    /// Smallest series size that can cover this range, counted from today.
    ///
    /// Compact responses hold about 100 trading days, so anything starting
    /// further back than ~140 calendar days needs the full history.
    pub fn required_size(&self) -> SeriesSize {
        let today = Utc::now().date_naive();
        let calendar_days = (today - self.start).num_days();
        if calendar_days > SeriesSize::COMPACT_TRADING_DAYS * 7 / 5 {
            SeriesSize::Full
        } else {
            SeriesSize::Compact
        }
    }

    /// Bars from `bars` that fall inside the range.
    pub fn filter(&self, bars: &[Bar]) -> Vec<Bar> {
        bars.iter()
            .filter(|b| self.contains(&b.timestamp))
            .cloned()
            .collect()
    }
}
