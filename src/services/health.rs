use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::services::cache::CacheKeyring;
use crate::services::queue::JobQueue;
use crate::services::storage::Uploader;

/// Backing services that can be probed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, EnumString, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Service {
    Broker,
    Cache,
    Storage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub checks: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.values().all(ComponentHealth::is_healthy)
    }
}

/// Probes the broker, cache and object store.
#[derive(Clone)]
pub struct HealthProbe {
    queue: JobQueue,
    cache: CacheKeyring,
    storage: Arc<dyn Uploader>,
}

impl HealthProbe {
    pub fn new(queue: JobQueue, cache: CacheKeyring, storage: Arc<dyn Uploader>) -> Self {
        Self { queue, cache, storage }
    }

    pub async fn probe(&self, service: Service) -> ComponentHealth {
        match service {
            Service::Broker => timed(self.queue.health_check()).await,
            Service::Cache => timed(self.cache.health_check()).await,
            Service::Storage => timed(self.storage.health_check()).await,
        }
    }

    /// Probe every service concurrently.
    pub async fn probe_all(&self) -> HealthReport {
        let probes = Service::iter().map(|service| async move {
            (service.to_string(), self.probe(service).await)
        });
        let checks: BTreeMap<_, _> = futures::future::join_all(probes).await.into_iter().collect();

        let status = if checks.values().all(ComponentHealth::is_healthy) {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks,
        }
    }
}

async fn timed<E: std::fmt::Display>(check: impl Future<Output = Result<(), E>>) -> ComponentHealth {
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::{MemoryBroker, MemoryCache, MemoryStorage};
    use std::time::Duration;

    #[test]
    fn service_names_parse_case_insensitively() {
        assert_eq!("Cache".parse::<Service>().unwrap(), Service::Cache);
        assert_eq!(Service::Broker.to_string(), "broker");
        assert!("database".parse::<Service>().is_err());
    }

    #[tokio::test]
    async fn one_failing_service_degrades_the_report() {
        let broker = Arc::new(MemoryBroker::new());
        let cache = Arc::new(MemoryCache::new());
        let storage = Arc::new(MemoryStorage::new());
        let probe = HealthProbe::new(
            JobQueue::new(broker),
            CacheKeyring::new(cache.clone(), Duration::from_secs(60)),
            storage,
        );

        let report = probe.probe_all().await;
        assert!(report.is_healthy());
        assert_eq!(report.checks.len(), 3);

        cache.set_failing(true);
        let report = probe.probe_all().await;
        assert_eq!(report.status, "degraded");
        assert!(!report.checks["cache"].is_healthy());
        assert!(report.checks["broker"].is_healthy());
        assert!(!probe.probe(Service::Cache).await.is_healthy());
    }
}
