use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{DataCategory, DataRequest};

/// Composite cache address: category, symbol and normalized parameters.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub category: DataCategory,
    pub symbol: String,
    pub params: String,
}

impl CacheKey {
    pub fn new(
        category: DataCategory,
        symbol: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            category,
            symbol: symbol.into(),
            params: params.into(),
        }
    }

    /// Key for a normalized symbol and request.
    pub fn for_request(symbol: &str, request: &DataRequest) -> Self {
        Self::new(request.category(), symbol, request.params())
    }

    /// Stable file name in the persistent tier.
    pub fn file_name(&self) -> String {
        format!("{:x}.json", md5::compute(self.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.category, self.symbol, self.params)
    }
}
