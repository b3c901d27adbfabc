//! # Registry Module
//!
//! The instance index: source of truth for instance identity and state.
//!
//! ## Storage Backends
//!
//! The registry supports two storage backends:
//! - `InMemory`: volatile, for tests and ephemeral runs
//! - `Persistent`: uses `RedbRegistry`; every mutation is written through
//!   before the in-memory index changes, and the index is rebuilt from the
//!   database on open
//!
//! The registry itself is synchronous and unlocked. The app layer wraps it
//! in a single `RwLock` so mutations are serialized and the index and the
//! database never diverge.

use crate::storage::RedbRegistry;
use crate::{InstanceId, MeshError, ServiceInstance, ServiceRegistration, ServiceState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Storage backend for a Registry.
#[derive(Debug, Default)]
pub enum RegistryBackend {
    /// No persistence.
    #[default]
    InMemory,
    /// Disk-backed store using redb.
    Persistent(RedbRegistry),
}

/// Per-state instance counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub services: usize,
    pub total: usize,
    pub starting: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub draining: usize,
}

/// JSON snapshot of the registry, grouped by service name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub exported_at: chrono::DateTime<Utc>,
    pub services: BTreeMap<String, Vec<ServiceInstance>>,
}

/// The instance index.
#[derive(Debug, Default)]
pub struct Registry {
    backend: RegistryBackend,
    instances: HashMap<InstanceId, ServiceInstance>,
    /// Service name -> instance ids in registration order.
    by_name: BTreeMap<String, Vec<InstanceId>>,
}

impl Registry {
    /// Create an empty in-memory registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a persistent registry, rebuilding the index from the database.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let store = RedbRegistry::open(path)?;
        let mut registry = Self {
            backend: RegistryBackend::Persistent(store),
            ..Self::default()
        };

        let stored = match &registry.backend {
            RegistryBackend::Persistent(store) => store.load_all()?,
            RegistryBackend::InMemory => Vec::new(),
        };
        for instance in stored {
            registry.index(instance);
        }
        Ok(registry)
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, RegistryBackend::Persistent(_))
    }

    fn persist(&self, instance: &ServiceInstance) -> Result<(), MeshError> {
        match &self.backend {
            RegistryBackend::InMemory => Ok(()),
            RegistryBackend::Persistent(store) => store.put(instance),
        }
    }

    fn unpersist(&self, id: &InstanceId) -> Result<(), MeshError> {
        match &self.backend {
            RegistryBackend::InMemory => Ok(()),
            RegistryBackend::Persistent(store) => store.remove(id).map(|_| ()),
        }
    }

    fn index(&mut self, instance: ServiceInstance) {
        self.by_name
            .entry(instance.name.clone())
            .or_default()
            .push(instance.id);
        self.instances.insert(instance.id, instance);
    }

    /// Register a new instance. It starts in `Starting`.
    pub fn register(
        &mut self,
        registration: &ServiceRegistration,
    ) -> Result<ServiceInstance, MeshError> {
        registration.validate()?;
        let instance = ServiceInstance::from_registration(registration);
        self.persist(&instance)?;
        self.index(instance.clone());
        Ok(instance)
    }

    /// Deregister an instance.
    ///
    /// Returns the instance marked `Terminated`, or `None` if it was not
    /// registered.
    pub fn deregister(&mut self, id: &InstanceId) -> Result<Option<ServiceInstance>, MeshError> {
        if !self.instances.contains_key(id) {
            return Ok(None);
        }
        self.unpersist(id)?;

        let Some(mut instance) = self.instances.remove(id) else {
            return Ok(None);
        };
        if let Some(ids) = self.by_name.get_mut(&instance.name) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_name.remove(&instance.name);
            }
        }
        instance.state = ServiceState::Terminated;
        Ok(Some(instance))
    }

    /// Instances of `name`, in registration order.
    ///
    /// With `healthy_only`, only `Healthy` and `Degraded` instances are
    /// returned; a freshly registered (`Starting`) instance is therefore not
    /// discoverable until its first successful health check.
    #[must_use]
    pub fn discover(&self, name: &str, healthy_only: bool) -> Vec<ServiceInstance> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.instances.get(id))
                    .filter(|i| !healthy_only || i.state.is_available())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set an instance's state.
    ///
    /// Returns `Some(previous)` when the state changed and `None` when it
    /// was already `state` (in which case nothing is written).
    pub fn update_state(
        &mut self,
        id: &InstanceId,
        state: ServiceState,
    ) -> Result<Option<ServiceState>, MeshError> {
        let current = self
            .instances
            .get(id)
            .ok_or(MeshError::InstanceNotFound(*id))?;
        if current.state == state {
            return Ok(None);
        }

        let mut updated = current.clone();
        let previous = updated.state;
        updated.state = state;
        updated.last_heartbeat = Utc::now();

        self.persist(&updated)?;
        self.instances.insert(*id, updated);
        Ok(Some(previous))
    }

    /// Record a heartbeat. Returns `false` if the instance is unknown.
    pub fn heartbeat(&mut self, id: &InstanceId) -> Result<bool, MeshError> {
        let Some(current) = self.instances.get(id) else {
            return Ok(false);
        };
        let mut updated = current.clone();
        updated.last_heartbeat = Utc::now();

        self.persist(&updated)?;
        self.instances.insert(*id, updated);
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&ServiceInstance> {
        self.instances.get(id)
    }

    /// Every registered instance, grouped by service name.
    #[must_use]
    pub fn list(&self) -> Vec<ServiceInstance> {
        self.by_name
            .values()
            .flatten()
            .filter_map(|id| self.instances.get(id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        let mut counts = RegistryCounts {
            services: self.by_name.len(),
            total: self.instances.len(),
            ..RegistryCounts::default()
        };
        for instance in self.instances.values() {
            match instance.state {
                ServiceState::Starting => counts.starting += 1,
                ServiceState::Healthy => counts.healthy += 1,
                ServiceState::Degraded => counts.degraded += 1,
                ServiceState::Unhealthy => counts.unhealthy += 1,
                ServiceState::Draining => counts.draining += 1,
                ServiceState::Terminated => {}
            }
        }
        counts
    }

    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let services = self
            .by_name
            .keys()
            .map(|name| (name.clone(), self.discover(name, false)))
            .collect();
        RegistrySnapshot {
            exported_at: Utc::now(),
            services,
        }
    }

    /// Write a pretty JSON snapshot to `path`.
    pub fn export_snapshot(&self, path: impl AsRef<Path>) -> Result<(), MeshError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| MeshError::SerializationError(e.to_string()))?;
        std::fs::write(path.as_ref(), json).map_err(|e| {
            MeshError::IoError(format!(
                "cannot write snapshot '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}
