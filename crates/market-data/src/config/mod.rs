//! Engine configuration.
//!
//! Configuration is plain data. It can be built in code, loaded from
//! `STOCKPILE_*` environment variables (with `.env` support), or read from a
//! JSON file where durations are written in milliseconds.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;
use crate::models::{DataCategory, ProviderId};
use crate::provider;
use crate::registry::{
    CircuitBreakerConfig, RateLimitConfig, RetryPolicy, ValidatorConfig,
    DEFAULT_AUTH_DISABLE_THRESHOLD,
};

/// Provider order used when `STOCKPILE_PROVIDERS` is not set.
const DEFAULT_PROVIDERS: &str = "YAHOO,ALPHA_VANTAGE,TWELVE_DATA,FINNHUB";

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_DIR: &str = ".stockpile/cache";
const DEFAULT_STALE_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Serde helper storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Static description of one provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider name, e.g. `ALPHA_VANTAGE`.
    pub name: String,
    /// Lower number = tried first. Must be unique.
    pub priority: u32,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Overrides the adapter's default limits.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default = "default_auth_threshold")]
    pub auth_disable_threshold: u32,
}

fn default_auth_threshold() -> u32 {
    DEFAULT_AUTH_DISABLE_THRESHOLD
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        let name = name.into();
        let credential_env = provider::default_credential_env(&name).map(str::to_string);
        Self {
            name,
            priority,
            credential_env,
            rate_limit: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            auth_disable_threshold: DEFAULT_AUTH_DISABLE_THRESHOLD,
        }
    }

    pub fn id(&self) -> ProviderId {
        ProviderId::Owned(self.name.clone())
    }

    /// Read the API key from the referenced environment variable.
    pub fn resolve_credential(&self) -> Option<String> {
        self.credential_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Freshness per data category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    #[serde(rename = "quote_ms", with = "duration_ms")]
    pub quote: Duration,
    #[serde(rename = "intraday_ms", with = "duration_ms")]
    pub intraday: Duration,
    #[serde(rename = "daily_ms", with = "duration_ms")]
    pub daily: Duration,
    #[serde(rename = "overview_ms", with = "duration_ms")]
    pub overview: Duration,
}

impl TtlTable {
    /// The largest TTL of any category.
    pub fn longest(&self) -> Duration {
        DataCategory::ALL
            .into_iter()
            .map(|category| self.ttl(category))
            .max()
            .unwrap_or_default()
    }

    pub fn ttl(&self, category: DataCategory) -> Duration {
        match category {
            DataCategory::Quote => self.quote,
            DataCategory::Intraday => self.intraday,
            DataCategory::Daily => self.daily,
            DataCategory::Overview => self.overview,
        }
    }

    fn set(&mut self, category: DataCategory, ttl: Duration) {
        match category {
            DataCategory::Quote => self.quote = ttl,
            DataCategory::Intraday => self.intraday = ttl,
            DataCategory::Daily => self.daily = ttl,
            DataCategory::Overview => self.overview = ttl,
        }
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            quote: Duration::from_secs(60),
            intraday: Duration::from_secs(5 * 60),
            daily: Duration::from_secs(6 * 60 * 60),
            overview: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Full engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub providers: Vec<ProviderDescriptor>,
    pub ttl: TtlTable,
    /// Deadline applied when a call does not pass its own.
    #[serde(rename = "default_deadline_ms", with = "duration_ms")]
    pub default_deadline: Duration,
    pub retry: RetryPolicy,
    pub validator: ValidatorConfig,
    /// Directory of the persistent cache tier.
    pub cache_dir: PathBuf,
    /// Providers raced concurrently per request; 1 means sequential.
    pub race_top_k: usize,
    /// Disk entries older than this are deleted rather than served stale.
    #[serde(rename = "stale_retention_ms", with = "duration_ms")]
    pub stale_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: providers_from_list(DEFAULT_PROVIDERS),
            ttl: TtlTable::default(),
            default_deadline: DEFAULT_DEADLINE,
            retry: RetryPolicy::default(),
            validator: ValidatorConfig::default(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            race_top_k: 1,
            stale_retention: DEFAULT_STALE_RETENTION,
        }
    }
}

fn providers_from_list(list: &str) -> Vec<ProviderDescriptor> {
    list.split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, name)| ProviderDescriptor::new(name, index as u32 + 1))
        .collect()
}

/// Parse an optional variable, keeping `default` when it is unset or invalid.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            default
        }),
        None => default,
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}

impl EngineConfig {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let list = lookup("STOCKPILE_PROVIDERS").unwrap_or_else(|| DEFAULT_PROVIDERS.to_string());

        let providers = providers_from_list(&list)
            .into_iter()
            .map(|descriptor| Self::provider_from_lookup(&lookup, descriptor))
            .collect();

        let mut ttl = TtlTable::default();
        for category in DataCategory::ALL {
            let key = format!("STOCKPILE_TTL_{}_SECS", category.as_str().to_ascii_uppercase());
            let secs = parse_or(&lookup, &key, ttl.ttl(category).as_secs());
            ttl.set(category, Duration::from_secs(secs));
        }

        let max_price: Decimal =
            parse_or(&lookup, "STOCKPILE_MAX_PRICE", defaults.validator.max_price);

        Self {
            providers,
            ttl,
            default_deadline: millis_or(
                &lookup,
                "STOCKPILE_DEADLINE_MS",
                defaults.default_deadline,
            ),
            retry: defaults.retry,
            validator: ValidatorConfig { max_price },
            cache_dir: lookup("STOCKPILE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            race_top_k: parse_or(&lookup, "STOCKPILE_RACE_TOP_K", defaults.race_top_k),
            stale_retention: defaults.stale_retention,
        }
    }

    fn provider_from_lookup<F>(lookup: &F, mut descriptor: ProviderDescriptor) -> ProviderDescriptor
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("STOCKPILE_{}", descriptor.name);
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);

        if let Some(var) = lookup(&key("KEY_ENV")) {
            descriptor.credential_env = Some(var.trim().to_string());
        }

        let rate_keys = [
            "MAX_PER_WINDOW",
            "WINDOW_MS",
            "BURST_LIMIT",
            "BURST_WINDOW_MS",
            "MIN_INTERVAL_MS",
        ];
        if rate_keys.iter().any(|suffix| lookup(&key(suffix)).is_some()) {
            let base = provider::default_limits_for(&descriptor.name);
            descriptor.rate_limit = Some(RateLimitConfig {
                max_per_window: parse_or(lookup, &key("MAX_PER_WINDOW"), base.max_per_window),
                window: millis_or(lookup, &key("WINDOW_MS"), base.window),
                burst_limit: parse_or(lookup, &key("BURST_LIMIT"), base.burst_limit),
                burst_window: millis_or(lookup, &key("BURST_WINDOW_MS"), base.burst_window),
                min_interval: millis_or(lookup, &key("MIN_INTERVAL_MS"), base.min_interval),
            });
        }

        let breaker = descriptor.circuit_breaker.clone();
        descriptor.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: parse_or(
                lookup,
                &key("FAILURE_THRESHOLD"),
                breaker.failure_threshold,
            ),
            failure_window: millis_or(lookup, &key("FAILURE_WINDOW_MS"), breaker.failure_window),
            open_duration: millis_or(lookup, &key("OPEN_DURATION_MS"), breaker.open_duration),
            half_open_max_probes: parse_or(
                lookup,
                &key("HALF_OPEN_MAX_PROBES"),
                breaker.half_open_max_probes,
            ),
        };
        descriptor.auth_disable_threshold = parse_or(
            lookup,
            &key("AUTH_DISABLE_THRESHOLD"),
            descriptor.auth_disable_threshold,
        );

        descriptor
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MarketDataError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MarketDataError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            MarketDataError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.providers.is_empty() {
            return Err(MarketDataError::Config("No providers configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for descriptor in &self.providers {
            if !names.insert(descriptor.name.as_str()) {
                return Err(MarketDataError::Config(format!(
                    "Duplicate provider: {}",
                    descriptor.name
                )));
            }
            if !priorities.insert(descriptor.priority) {
                return Err(MarketDataError::Config(format!(
                    "Duplicate priority {} ({})",
                    descriptor.priority, descriptor.name
                )));
            }
            if let Some(limit) = &descriptor.rate_limit {
                if limit.max_per_window == 0 || limit.window.is_zero() {
                    return Err(MarketDataError::Config(format!(
                        "Rate limit window for {} must be non-zero",
                        descriptor.name
                    )));
                }
            }
            let breaker = &descriptor.circuit_breaker;
            if breaker.failure_threshold == 0 || breaker.half_open_max_probes == 0 {
                return Err(MarketDataError::Config(format!(
                    "Circuit breaker thresholds for {} must be non-zero",
                    descriptor.name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(MarketDataError::Config(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }
        if self.default_deadline.is_zero() {
            return Err(MarketDataError::Config("Default deadline must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Descriptors sorted by ascending priority number.
    pub fn providers_by_priority(&self) -> Vec<ProviderDescriptor> {
        let mut providers = self.providers.clone();
        providers.sort_by_key(|p| p.priority);
        providers
    }
}
