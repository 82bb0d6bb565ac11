//! Short-TTL response cache for `GET /agents`, gated by
//! `RegistryConfig::response_cache_enabled`.
//!
//! Registrations and heartbeats invalidate the single cached entry
//! directly rather than waiting for it to expire, so the cache never
//! serves data older than the last mutation.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::model::Agent;

const CACHE_KEY: &str = "agents";
const TTL: Duration = Duration::from_secs(5);

/// Thin wrapper so callers don't need to know the cache key or TTL.
pub struct AgentListCache {
    enabled: bool,
    cache: Cache<&'static str, Arc<Vec<Agent>>>,
}

impl AgentListCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            cache: Cache::builder().time_to_live(TTL).max_capacity(1).build(),
        }
    }

    pub async fn get(&self) -> Option<Arc<Vec<Agent>>> {
        if !self.enabled {
            return None;
        }
        self.cache.get(&CACHE_KEY).await
    }

    pub async fn set(&self, agents: Vec<Agent>) {
        if !self.enabled {
            return;
        }
        self.cache.insert(CACHE_KEY, Arc::new(agents)).await;
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate(&CACHE_KEY).await;
    }
}
