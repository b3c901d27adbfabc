//! # redb-backed Registry Storage
//!
//! A disk-backed instance table using the redb embedded database.
//!
//! Each mutation writes or removes a single key inside one ACID
//! transaction, so the cost of persisting does not grow with the number
//! of registered instances. The in-memory index is rebuilt from this table
//! on startup via [`RedbRegistry::load_all`].

use crate::{InstanceId, MeshError, ServiceInstance};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for instances: instance id (string) -> JSON-encoded ServiceInstance
const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

fn storage_err(e: impl std::fmt::Display) -> MeshError {
    MeshError::StorageError(e.to_string())
}

/// A disk-backed instance store using redb.
pub struct RedbRegistry {
    db: Database,
}

impl std::fmt::Debug for RedbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRegistry").finish_non_exhaustive()
    }
}

impl RedbRegistry {
    /// Open or create a registry database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize the table if it doesn't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(INSTANCES).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self { db })
    }

    /// Insert or overwrite one instance.
    pub fn put(&self, instance: &ServiceInstance) -> Result<(), MeshError> {
        let key = instance.id.to_string();
        let bytes = serde_json::to_vec(instance)
            .map_err(|e| MeshError::SerializationError(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(INSTANCES).map_err(storage_err)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Remove one instance. Returns whether it was present.
    pub fn remove(&self, id: &InstanceId) -> Result<bool, MeshError> {
        let key = id.to_string();
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let existed = {
            let mut table = write_txn.open_table(INSTANCES).map_err(storage_err)?;
            table.remove(key.as_str()).map_err(storage_err)?.is_some()
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(existed)
    }

    /// Load every stored instance, oldest registration first.
    pub fn load_all(&self) -> Result<Vec<ServiceInstance>, MeshError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(INSTANCES).map_err(storage_err)?;

        let mut instances = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            let instance: ServiceInstance = serde_json::from_slice(value.value())
                .map_err(|e| MeshError::SerializationError(e.to_string()))?;
            instances.push(instance);
        }
        instances.sort_by_key(|i| i.registered_at);
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServiceRegistration, ServiceState};
    use tempfile::tempdir;

    fn instance(name: &str, port: u16) -> ServiceInstance {
        ServiceInstance::from_registration(&ServiceRegistration::new(name, "localhost", port))
    }

    #[test]
    fn put_and_load() {
        let dir = tempdir().expect("tempdir");
        let store = RedbRegistry::open(dir.path().join("registry.redb")).expect("open");

        let a = instance("a", 9000);
        let b = instance("b", 9001);
        store.put(&a).expect("put");
        store.put(&b).expect("put");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&a));
        assert!(loaded.contains(&b));
    }

    #[test]
    fn put_overwrites_same_id() {
        let dir = tempdir().expect("tempdir");
        let store = RedbRegistry::open(dir.path().join("registry.redb")).expect("open");

        let mut a = instance("a", 9000);
        store.put(&a).expect("put");
        a.state = ServiceState::Healthy;
        store.put(&a).expect("put");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, ServiceState::Healthy);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempdir().expect("tempdir");
        let store = RedbRegistry::open(dir.path().join("registry.redb")).expect("open");

        let a = instance("a", 9000);
        store.put(&a).expect("put");
        assert!(store.remove(&a.id).expect("remove"));
        assert!(!store.remove(&a.id).expect("remove"));
        assert!(store.load_all().expect("load").is_empty());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("registry.redb");
        let a = instance("a", 9000);
        {
            let store = RedbRegistry::open(&path).expect("open");
            store.put(&a).expect("put");
        }
        let store = RedbRegistry::open(&path).expect("reopen");
        assert_eq!(store.load_all().expect("load"), vec![a]);
    }
}
