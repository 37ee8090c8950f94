use crate::config::Config;
use moka::future::Cache;

/// Memoizes token-account -> owner lookups issued by the extractor's
/// instruction-parse fallback, negative results included, so a wallet that
/// deposited many times costs one account fetch.
pub type OwnerCache = Cache<String, Option<String>>;

pub fn init_owner_cache(config: &Config) -> OwnerCache {
    Cache::builder()
        .time_to_live(config.cache_ttl)
        .max_capacity(config.cache_max_capacity)
        .build()
}
