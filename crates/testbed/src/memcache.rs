//! Memcache sandbox.

use std::sync::Arc;

use testbed_stubs::{CacheStats, MemcacheStub, ServiceRegistry};

use crate::base::Sandbox;

/// Flushes the cache between tests and checks its statistics.
///
/// Always acts on the memcache currently in the registry.
#[derive(Clone)]
pub struct MemcacheSandbox {
    services: ServiceRegistry,
}

impl MemcacheSandbox {
    /// Binds to the registry's memcache and flushes it.
    pub fn new(services: &ServiceRegistry) -> Self {
        let mut sandbox = Self {
            services: services.clone(),
        };
        sandbox.set_up();
        sandbox
    }

    /// Removes every cached item and resets the statistics.
    pub fn clear_memcache(&self) {
        self.stub().flush_all();
    }

    /// The raw cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stub().get_stats()
    }

    /// # Panics
    ///
    /// Panics unless the cache has served exactly `hits` hits since the last flush.
    pub fn assert_memcache_hits(&self, hits: u64) {
        let actual = self.stats().hits;
        assert_eq!(
            actual, hits,
            "Expected {hits} memcache hits, got {actual}"
        );
    }

    /// # Panics
    ///
    /// Panics unless the cache currently holds exactly `items` items.
    pub fn assert_memcache_items(&self, items: u64) {
        let actual = self.stats().items;
        assert_eq!(
            actual, items,
            "Expected {items} memcache items, got {actual}"
        );
    }

    /// The memcache currently registered.
    pub fn stub(&self) -> Arc<dyn MemcacheStub> {
        self.services.memcache()
    }
}

impl Sandbox for MemcacheSandbox {
    fn set_up(&mut self) {
        self.clear_memcache();
    }
}
