//! # Service Registry
//!
//! Async wrapper around the core [`Registry`] index.
//!
//! All mutations go through one `tokio::sync::RwLock` (single writer, many
//! readers), so persisting and indexing happen as one step. Every change is
//! announced on a broadcast channel; slow subscribers may lag but never
//! block the registry.

use meshwork_core::{
    InstanceId, MeshError, Registry, RegistryCounts, ServiceInstance, ServiceRegistration,
    ServiceState,
};
use serde::Serialize;
use std::path::Path;
use tokio::sync::{RwLock, broadcast};

const NOTIFICATION_CAPACITY: usize = 256;

/// A registry change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryNotification {
    Registered {
        instance: ServiceInstance,
    },
    Deregistered {
        instance: ServiceInstance,
    },
    StateChanged {
        id: InstanceId,
        name: String,
        from: ServiceState,
        to: ServiceState,
    },
}

/// Shared, notifying service registry.
pub struct ServiceRegistry {
    inner: RwLock<Registry>,
    notify: broadcast::Sender<RegistryNotification>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        let (notify, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: RwLock::new(registry),
            notify,
        }
    }

    /// Registry persisted in a redb database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let registry = Registry::with_redb(path.as_ref())?;
        tracing::info!(
            path = %path.as_ref().display(),
            instances = registry.len(),
            "Registry loaded"
        );
        Ok(Self::new(registry))
    }

    fn announce(&self, notification: RegistryNotification) {
        // No receivers is not an error.
        let _ = self.notify.send(notification);
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryNotification> {
        self.notify.subscribe()
    }

    pub async fn register(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<ServiceInstance, MeshError> {
        let instance = self.inner.write().await.register(registration)?;
        tracing::info!(
            service = %instance.name,
            id = %instance.id,
            address = %instance.base_url(),
            "Service registered"
        );
        self.announce(RegistryNotification::Registered {
            instance: instance.clone(),
        });
        Ok(instance)
    }

    /// Returns the removed instance (marked `Terminated`), if it existed.
    pub async fn deregister(&self, id: &InstanceId) -> Result<Option<ServiceInstance>, MeshError> {
        let removed = self.inner.write().await.deregister(id)?;
        if let Some(instance) = &removed {
            tracing::info!(service = %instance.name, id = %id, "Service deregistered");
            self.announce(RegistryNotification::Deregistered {
                instance: instance.clone(),
            });
        }
        Ok(removed)
    }

    pub async fn discover(&self, name: &str, healthy_only: bool) -> Vec<ServiceInstance> {
        self.inner.read().await.discover(name, healthy_only)
    }

    /// Returns whether the state actually changed.
    pub async fn update_state(&self, id: &InstanceId, state: ServiceState) -> Result<bool, MeshError> {
        let mut registry = self.inner.write().await;
        let Some(previous) = registry.update_state(id, state)? else {
            return Ok(false);
        };
        let name = registry.get(id).map(|i| i.name.clone()).unwrap_or_default();
        drop(registry);

        tracing::info!(service = %name, id = %id, from = %previous, to = %state, "State changed");
        self.announce(RegistryNotification::StateChanged {
            id: *id,
            name,
            from: previous,
            to: state,
        });
        Ok(true)
    }

    pub async fn heartbeat(&self, id: &InstanceId) -> Result<bool, MeshError> {
        self.inner.write().await.heartbeat(id)
    }

    pub async fn get(&self, id: &InstanceId) -> Option<ServiceInstance> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ServiceInstance> {
        self.inner.read().await.list()
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.inner.read().await.service_names()
    }

    pub async fn counts(&self) -> RegistryCounts {
        self.inner.read().await.counts()
    }

    pub async fn is_persistent(&self) -> bool {
        self.inner.read().await.is_persistent()
    }

    pub async fn export_snapshot(&self, path: impl AsRef<Path>) -> Result<(), MeshError> {
        self.inner.read().await.export_snapshot(path)
    }
}
