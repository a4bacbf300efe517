//! Stockpile Market Data Crate
//!
//! Resilient market data acquisition over several external providers.
//!
//! # Overview
//!
//! The crate supports:
//! - Latest quotes, daily and intraday OHLCV series, company overviews
//! - Multiple providers: Yahoo Finance, Alpha Vantage, Twelve Data, Finnhub
//! - Priority-ordered fallback, with optional racing of the top providers
//! - Per-provider rate limiting, circuit breaking and auth disabling
//! - A two-tier (memory + disk) cache with stale fallback
//!
//! # Architecture
//!
//! ```text
//!                          +------------------+
//!                          |      Engine      |  (public API)
//!                          +------------------+
//!                             |            |
//!                             v            v
//!                  +--------------+   +----------------------+
//!                  |  CacheStore  |   | ProviderOrchestrator |
//!                  +--------------+   +----------------------+
//!                                        |
//!                      rate limiter -> circuit breaker -> retry -> validator
//!                                        |
//!                                        v
//!                          +------------------+
//!                          |  ProviderClient  |  (Yahoo, AlphaVantage, etc.)
//!                          +------------------+
//! ```
//!
//! Every answer carries [`SelectionMetadata`] naming the single provider the
//! data came from and why each other consulted provider was passed over.
//! Responses are never merged across providers.
//!
//! # Example
//!
//! ```ignore
//! use stockpile_market_data::{Engine, FetchOptions};
//!
//! let engine = Engine::from_env()?;
//! let snapshot = engine.get_snapshot("AAPL", FetchOptions::default()).await?;
//! println!("{} {} via {}", snapshot.symbol, snapshot.price, snapshot.source);
//! ```

pub mod cache;
pub mod config;
mod engine;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use engine::Engine;

pub use config::{EngineConfig, ProviderDescriptor, TtlTable};
pub use errors::{MarketDataError, RetryClass};

// Re-export all public types from models
pub use models::{
    AttemptOutcome, Bar, DataCategory, DataRequest, FetchOptions, IntradayInterval,
    MarketSnapshot, Payload, ProviderAttempt, ProviderId, RawOverview, RawQuote, RawSeries,
    RejectReason, SelectionMetadata, SeriesSize, Sourced, TimeRange,
};

// Re-export provider types
pub use provider::{
    AlphaVantageProvider, FinnhubProvider, ProviderClient, TwelveDataProvider, YahooProvider,
};
#[cfg(feature = "synthetic")]
pub use provider::SyntheticProvider;

// Re-export registry types
pub use registry::{CircuitState, ProviderStatus, RateLimitConfig, RetryPolicy};
