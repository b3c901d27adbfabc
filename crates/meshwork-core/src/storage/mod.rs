//! # Storage Module
//!
//! Persistent storage backends for the control plane.
//!
//! - `redb_registry`: redb-backed instance table keyed by instance id

mod redb_registry;

pub use redb_registry::RedbRegistry;
