//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases and symbol normalization
//! - `quote` - Provider quote payload (RawQuote) and caller-facing MarketSnapshot
//! - `series` - OHLCV bars, series payloads, time ranges
//! - `overview` - Company fundamentals payload (RawOverview)
//! - `selection` - Selection metadata attached to every answer
//! - `request` - Request kinds, cache categories, fetch options

mod overview;
mod quote;
mod request;
mod selection;
mod series;
mod types;

pub use overview::RawOverview;
pub use quote::{MarketSnapshot, RawQuote};
pub use request::{DataCategory, DataRequest, FetchOptions, Payload, Sourced};
pub use selection::{AttemptOutcome, ProviderAttempt, RejectReason, SelectionMetadata};
pub use series::{Bar, IntradayInterval, RawSeries, SeriesSize, TimeRange};
pub use types::{normalize_symbol, ProviderId};
