//! Constraint and state repository.
//!
//! Two read-through caches keyed by series id, both with TTL and a capacity
//! guard. State writes are write-through: the backend is updated first and
//! the cache refreshed on success, so reads observe writes monotonically.
//! Concurrent misses on one key coalesce into a single backend load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;
use types::{Domain, SeriesState, StreamConfig};

use crate::error::Result;
use crate::storage::DomainStorageRouter;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
}

/// TTL cache with a capacity guard. When full, the least-recently-accessed
/// entry makes room for the new one.
struct TtlCache<V> {
    map: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        let mut map = self.map.lock();
        let entry = map.get_mut(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            map.remove(key);
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    fn insert(&self, key: String, value: V) {
        let mut map = self.map.lock();
        if map.len() >= self.capacity && !map.contains_key(&key) {
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }
        let now = Instant::now();
        map.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_access: now,
            },
        );
    }

    fn values(&self) -> Vec<V> {
        let map = self.map.lock();
        map.values().map(|e| e.value.clone()).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// Read-through repository over the domain storage router.
pub struct SeriesRepository {
    storage: Arc<DomainStorageRouter>,
    configs: TtlCache<StreamConfig>,
    states: TtlCache<SeriesState>,
    /// Per-key gates coalescing concurrent loads of the same series.
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    default_warmup: u32,
    missing_config_logged: DashMap<String, ()>,
}

impl SeriesRepository {
    pub fn new(
        storage: Arc<DomainStorageRouter>,
        cache_ttl: Duration,
        cache_capacity: usize,
        default_warmup: u32,
    ) -> Self {
        Self {
            storage,
            configs: TtlCache::new(cache_ttl, cache_capacity),
            states: TtlCache::new(cache_ttl, cache_capacity),
            inflight: DashMap::new(),
            default_warmup,
            missing_config_logged: DashMap::new(),
        }
    }

    async fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Stream configuration for the series; domain defaults on a miss,
    /// logged once per series.
    pub async fn config_for(&self, series_id: &str, domain: Domain) -> Result<StreamConfig> {
        if let Some(cfg) = self.configs.get(series_id) {
            return Ok(cfg);
        }
        let gate = self.gate(&format!("cfg:{series_id}")).await;
        let _held = gate.lock().await;
        // A concurrent load may have filled the cache while we waited.
        if let Some(cfg) = self.configs.get(series_id) {
            return Ok(cfg);
        }

        let loaded = self
            .storage
            .for_domain(domain)
            .load_config(series_id)
            .await?;
        let cfg = match loaded {
            Some(cfg) => cfg,
            None => {
                if self
                    .missing_config_logged
                    .insert(series_id.to_string(), ())
                    .is_none()
                {
                    warn!(series_id, domain = domain.as_str(), "no stored config, applying domain defaults");
                }
                StreamConfig::defaults_for(series_id, domain)
            }
        };
        self.configs.insert(series_id.to_string(), cfg.clone());
        Ok(cfg)
    }

    /// Operational state for the series; a fresh warm-up state on a miss.
    pub async fn state_for(&self, series_id: &str, domain: Domain, now: f64) -> Result<SeriesState> {
        if let Some(state) = self.states.get(series_id) {
            return Ok(state);
        }
        let gate = self.gate(&format!("st:{series_id}")).await;
        let _held = gate.lock().await;
        if let Some(state) = self.states.get(series_id) {
            return Ok(state);
        }

        let loaded = self.storage.for_domain(domain).load_state(series_id).await?;
        let state = loaded
            .unwrap_or_else(|| SeriesState::new(series_id, self.default_warmup, now));
        self.states.insert(series_id.to_string(), state.clone());
        Ok(state)
    }

    /// Write-through state update: persisted first, cached on success.
    pub async fn update_state(&self, state: SeriesState) -> Result<()> {
        let domain = Domain::of_series(&state.series_id);
        self.storage.for_domain(domain).store_state(&state).await?;
        self.states.insert(state.series_id.clone(), state);
        Ok(())
    }

    /// Every state currently cached; the sweeper's working set.
    pub fn cached_states(&self) -> Vec<SeriesState> {
        self.states.values()
    }

    /// Drop a cached config so the next read goes back to the store.
    pub fn invalidate_config(&self, series_id: &str) {
        self.configs.map.lock().remove(series_id);
    }
}
