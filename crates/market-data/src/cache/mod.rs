//! Two-tier response cache.
//!
//! - `key` - Composite cache keys
//! - `entry` - Cached entries and their versioned on-disk envelope
//! - `memory` - In-process tier
//! - `disk` - Persistent tier
//! - `store` - `CacheStore`, the facade the orchestrator talks to

mod disk;
mod entry;
mod key;
mod memory;
mod store;

pub use entry::{CacheEntry, CACHE_SCHEMA, CACHE_VERSION};
pub use key::CacheKey;
pub use store::CacheStore;
