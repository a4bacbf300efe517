use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::overview::RawOverview;
use super::quote::RawQuote;
use super::selection::SelectionMetadata;
use super::series::{IntradayInterval, RawSeries, SeriesSize};

/// Data category, used to pick the cache TTL.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Quote,
    Intraday,
    Daily,
    Overview,
}

impl DataCategory {
    pub const ALL: [DataCategory; 4] = [
        DataCategory::Quote,
        DataCategory::Intraday,
        DataCategory::Daily,
        DataCategory::Overview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Intraday => "intraday",
            Self::Daily => "daily",
            Self::Overview => "overview",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to fetch from a provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DataRequest {
    Quote,
    DailySeries(SeriesSize),
    IntradaySeries(IntradayInterval),
    Overview,
}

impl DataRequest {
    pub fn category(&self) -> DataCategory {
        match self {
            Self::Quote => DataCategory::Quote,
            Self::DailySeries(_) => DataCategory::Daily,
            Self::IntradaySeries(_) => DataCategory::Intraday,
            Self::Overview => DataCategory::Overview,
        }
    }

    /// Normalized request parameters, part of the cache key.
    pub fn params(&self) -> String {
        match self {
            Self::Quote | Self::Overview => String::new(),
            Self::DailySeries(size) => format!("size={}", size.as_str()),
            Self::IntradaySeries(interval) => format!("interval={}", interval.as_str()),
        }
    }

    /// Operation name used in logs and `NotSupported` errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::DailySeries(_) => "daily_series",
            Self::IntradaySeries(_) => "intraday_series",
            Self::Overview => "overview",
        }
    }
}

/// Normalized provider response, as stored in the cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Quote(RawQuote),
    Series(RawSeries),
    Overview(RawOverview),
}

impl Payload {
    /// Symbol echoed back by the provider.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(q) => &q.symbol,
            Self::Series(s) => &s.symbol,
            Self::Overview(o) => &o.symbol,
        }
    }
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Overall deadline for the call; the engine default applies when `None`.
    pub deadline: Option<Duration>,

    /// Skip the fresh-cache check for this call.
    pub force_refresh: bool,

    /// Query the top K providers concurrently instead of one at a time.
    /// Overrides the engine's configured race width.
    pub race_top_k: Option<usize>,
}

impl FetchOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn race(mut self, top_k: usize) -> Self {
        self.race_top_k = Some(top_k);
        self
    }
}

/// A value taken from exactly one provider, with its provenance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub data: T,

    /// Provider the data came from
    pub source: String,

    /// True when served from an expired cache entry after every provider failed
    pub stale: bool,

    pub selection: SelectionMetadata,
}
