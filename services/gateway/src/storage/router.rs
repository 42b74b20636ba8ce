//! Domain storage router.
//!
//! Directs persistence to the legacy (IoT) or generic backend based on the
//! point's domain. The two backends are completely independent: either may
//! be down without taking the other with it, and no operation ever writes
//! across them.

use std::collections::HashMap;
use std::sync::Arc;

use types::Domain;

use super::{BackendHealth, SeriesStore};

/// One backend per family of domains; never crossed.
pub struct DomainStorageRouter {
    legacy: Arc<dyn SeriesStore>,
    generic: Arc<dyn SeriesStore>,
}

impl DomainStorageRouter {
    pub fn new(legacy: Arc<dyn SeriesStore>, generic: Arc<dyn SeriesStore>) -> Self {
        Self { legacy, generic }
    }

    /// The backend responsible for a domain. Legacy IoT goes to the
    /// relational store, everything else to the time-series store.
    pub fn for_domain(&self, domain: Domain) -> &Arc<dyn SeriesStore> {
        if domain.is_legacy() {
            &self.legacy
        } else {
            &self.generic
        }
    }

    pub fn legacy(&self) -> &Arc<dyn SeriesStore> {
        &self.legacy
    }

    pub fn generic(&self) -> &Arc<dyn SeriesStore> {
        &self.generic
    }

    pub fn backend_by_name(&self, name: &str) -> Option<&Arc<dyn SeriesStore>> {
        if self.legacy.name() == name {
            Some(&self.legacy)
        } else if self.generic.name() == name {
            Some(&self.generic)
        } else {
            None
        }
    }

    /// Health of each backend, reported independently.
    pub async fn health(&self) -> HashMap<&'static str, BackendHealth> {
        let mut map = HashMap::new();
        map.insert(self.legacy.name(), self.legacy.health().await);
        map.insert(self.generic.name(), self.generic.health().await);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use types::{Classification, ClassifyReason, DataPoint, OperationalState, UnifiedReading};

    fn reading(domain: Domain, series: &str) -> UnifiedReading {
        UnifiedReading {
            point: DataPoint::new(series, 1.0, 1.0, domain),
            classification: Classification::Normal,
            reason: ClassifyReason::Clean,
            explanation: String::new(),
            delta: None,
            state: OperationalState::Normal,
            prediction_enabled: true,
        }
    }

    #[tokio::test]
    async fn iot_routes_to_legacy_everything_else_to_generic() {
        let legacy = Arc::new(MemoryStore::new("legacy"));
        let generic = Arc::new(MemoryStore::new("generic"));
        let router = DomainStorageRouter::new(legacy.clone(), generic.clone());

        router
            .for_domain(Domain::Iot)
            .insert_point(&reading(Domain::Iot, "42"))
            .await
            .unwrap();
        for domain in [
            Domain::Infrastructure,
            Domain::Finance,
            Domain::Health,
            Domain::Generic,
        ] {
            router
                .for_domain(domain)
                .insert_point(&reading(domain, "g/s/x"))
                .await
                .unwrap();
        }

        assert_eq!(legacy.point_count(), 1);
        assert_eq!(generic.point_count(), 4);
    }

    #[tokio::test]
    async fn backends_fail_independently() {
        let legacy = Arc::new(MemoryStore::new("legacy"));
        let generic = Arc::new(MemoryStore::new("generic"));
        let router = DomainStorageRouter::new(legacy.clone(), generic.clone());

        legacy.set_failing(true);
        let health = router.health().await;
        assert_eq!(health["legacy"].status, crate::storage::HealthStatus::Down);
        assert_eq!(health["generic"].status, crate::storage::HealthStatus::Ok);
    }
}
