//! Fans discovery out across all configured finders and caches the result.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CastError, CastResult};

use super::{Device, DeviceFinder};

/// Aggregates every configured [`DeviceFinder`], refreshing them
/// concurrently with a per-finder timeout (so one unreachable backend
/// cannot stall discovery of the others) and flattening the results into a
/// name-keyed cache.
pub struct DeviceRegistry {
    finders: Vec<Arc<dyn DeviceFinder>>,
    cache: DashMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new(finders: Vec<Arc<dyn DeviceFinder>>) -> Self {
        Self {
            finders,
            cache: DashMap::new(),
        }
    }

    async fn refresh_one(finder: Arc<dyn DeviceFinder>) -> Vec<Device> {
        let timeout = finder.request_timeout() + Duration::from_secs(1);
        match tokio::time::timeout(timeout, finder.find()).await {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                log::warn!("device finder failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                log::warn!("device finder timed out after {:?}", timeout);
                Vec::new()
            }
        }
    }

    /// Refreshes every finder concurrently and replaces the cache with the
    /// flattened result.
    pub async fn refresh_all_devices(&self) -> Vec<Arc<Device>> {
        let futures = self
            .finders
            .iter()
            .cloned()
            .map(Self::refresh_one);
        let results = futures::future::join_all(futures).await;

        self.cache.clear();
        let mut devices = Vec::new();
        for device in results.into_iter().flatten() {
            let handle = Arc::new(device);
            self.cache
                .insert(handle.get_device_name().to_string(), handle.clone());
            devices.push(handle);
        }
        devices
    }

    /// Returns the cached device list, refreshing first if the cache is
    /// empty.
    pub async fn list_all_devices(&self) -> Vec<Arc<Device>> {
        if self.cache.is_empty() {
            return self.refresh_all_devices().await;
        }
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    /// Finds a device by name, refreshing first if the cache is empty.
    pub async fn find_device_by_name(&self, name: &str) -> CastResult<Arc<Device>> {
        if self.cache.is_empty() {
            self.refresh_all_devices().await;
        }
        self.cache
            .get(name)
            .map(|e| e.value().clone())
            .ok_or(CastError::NotFound)
    }

    /// Collects the auxiliary HTTP routes every finder needs mounted.
    pub fn all_auxiliary_routes(&self) -> Vec<(&'static str, &'static str)> {
        self.finders
            .iter()
            .flat_map(|f| f.auxiliary_routes())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticFinder(Vec<String>, Duration);

    #[async_trait]
    impl DeviceFinder for StaticFinder {
        async fn find(&self) -> CastResult<Vec<Device>> {
            Ok(self
                .0
                .iter()
                .map(|name| {
                    Device::Web(super::super::web::WebDevice::new_for_test(name.clone()))
                })
                .collect())
        }

        fn request_timeout(&self) -> Duration {
            self.1
        }
    }

    struct FailingFinder;

    #[async_trait]
    impl DeviceFinder for FailingFinder {
        async fn find(&self) -> CastResult<Vec<Device>> {
            Err(CastError::Connection("unreachable".into()))
        }

        fn request_timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[tokio::test]
    async fn refresh_all_devices_flattens_across_finders_and_tolerates_failures() {
        let registry = DeviceRegistry::new(vec![
            Arc::new(StaticFinder(vec!["a".into(), "b".into()], Duration::from_millis(10))),
            Arc::new(FailingFinder),
        ]);
        let devices = registry.refresh_all_devices().await;
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn find_device_by_name_lazily_refreshes_empty_cache() {
        let registry = DeviceRegistry::new(vec![Arc::new(StaticFinder(
            vec!["living room".into()],
            Duration::from_millis(10),
        ))]);
        let found = registry.find_device_by_name("living room").await.unwrap();
        assert_eq!(found.get_device_name(), "living room");
    }

    #[tokio::test]
    async fn find_device_by_name_missing_is_not_found() {
        let registry = DeviceRegistry::new(vec![Arc::new(StaticFinder(vec![], Duration::from_millis(10)))]);
        assert!(matches!(
            registry.find_device_by_name("nope").await,
            Err(CastError::NotFound)
        ));
    }
}
