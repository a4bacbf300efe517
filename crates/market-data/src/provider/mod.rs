//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `ProviderClient` trait that all adapters implement
//! - Shared HTTP status and body classification
//! - Concrete adapters (Yahoo, Alpha Vantage, Twelve Data, Finnhub)
//! - A deterministic `SyntheticProvider`, behind the `synthetic` feature
//!
//! Adapters know nothing about retries, rate limits or caching; the
//! orchestrator applies those uniformly.

mod http;
mod traits;

pub mod alpha_vantage;
pub mod finnhub;
#[cfg(any(test, feature = "synthetic"))]
pub mod synthetic;
pub mod twelve_data;
pub mod yahoo;

use std::sync::Arc;

use log::info;

pub use alpha_vantage::AlphaVantageProvider;
pub use finnhub::FinnhubProvider;
#[cfg(any(test, feature = "synthetic"))]
pub use synthetic::SyntheticProvider;
pub use traits::ProviderClient;
pub use twelve_data::TwelveDataProvider;
pub use yahoo::YahooProvider;

use crate::config::ProviderDescriptor;
use crate::errors::MarketDataError;
use crate::registry::RateLimitConfig;

/// Environment variable conventionally holding a provider's API key.
///
/// `None` for providers that need no key (or are unknown).
pub fn default_credential_env(name: &str) -> Option<&'static str> {
    match name {
        alpha_vantage::PROVIDER_ID => Some("ALPHA_VANTAGE_API_KEY"),
        twelve_data::PROVIDER_ID => Some("TWELVE_DATA_API_KEY"),
        finnhub::PROVIDER_ID => Some("FINNHUB_API_KEY"),
        _ => None,
    }
}

/// Built-in rate limits for a provider name.
pub fn default_limits_for(name: &str) -> RateLimitConfig {
    match name {
        alpha_vantage::PROVIDER_ID => alpha_vantage::default_limits(),
        twelve_data::PROVIDER_ID => twelve_data::default_limits(),
        finnhub::PROVIDER_ID => finnhub::default_limits(),
        yahoo::PROVIDER_ID => yahoo::default_limits(),
        _ => RateLimitConfig::default(),
    }
}

/// Build the adapter named by a descriptor, resolving its credential.
pub fn build_provider(
    descriptor: &ProviderDescriptor,
) -> Result<Arc<dyn ProviderClient>, MarketDataError> {
    let api_key = || {
        descriptor.resolve_credential().ok_or_else(|| {
            MarketDataError::Config(format!(
                "No API key for {} (set {})",
                descriptor.name,
                descriptor.credential_env.as_deref().unwrap_or("a credential_env")
            ))
        })
    };

    let client: Arc<dyn ProviderClient> = match descriptor.name.as_str() {
        yahoo::PROVIDER_ID => Arc::new(YahooProvider::new()?),
        alpha_vantage::PROVIDER_ID => Arc::new(AlphaVantageProvider::new(api_key()?)),
        twelve_data::PROVIDER_ID => Arc::new(TwelveDataProvider::new(api_key()?)),
        finnhub::PROVIDER_ID => Arc::new(FinnhubProvider::new(api_key()?)),
        #[cfg(any(test, feature = "synthetic"))]
        synthetic::PROVIDER_ID => Arc::new(SyntheticProvider::new()),
        other => {
            return Err(MarketDataError::Config(format!(
                "Unknown provider: {}",
                other
            )))
        }
    };

    info!("Built provider {} (priority {})", client.id(), descriptor.priority);
    Ok(client)
}
