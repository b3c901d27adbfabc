//! # meshwork-core
//!
//! The synchronous core of the Meshwork control plane.
//!
//! This crate holds everything that can be decided without a network:
//! - the service and event data model (`types`, `event`)
//! - failure tracking and selection policy (`circuit_breaker`, `load_balancer`)
//! - the gateway's route table and sliding-window limiter (`routing`, `rate_limit`)
//! - the instance index and its redb-backed storage (`registry`, `storage`)
//! - the append-only event store (`event_store`)
//!
//! ## Constraints
//!
//! - NO async, NO network dependencies
//! - Every clocked component has an `_at(Instant)` variant for tests
//! - Locks are internal and never held across a call into another component

// =============================================================================
// MODULES
// =============================================================================

pub mod circuit_breaker;
pub mod event;
pub mod event_store;
pub mod load_balancer;
pub mod primitives;
pub mod rate_limit;
pub mod registry;
pub mod routing;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    GatewayHints, InstanceId, MeshError, ServiceInstance, ServiceRegistration, ServiceState,
};

// =============================================================================
// RE-EXPORTS: Events
// =============================================================================

pub use event::{Event, EventId, EventPriority, EventResult, EventStatus};
pub use event_store::EventStore;

// =============================================================================
// RE-EXPORTS: Resilience & Routing
// =============================================================================

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use load_balancer::{LoadBalancer, Strategy, weighted_index};
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
pub use routing::{RouteConfig, RouteMatch, RouteTable};

// =============================================================================
// RE-EXPORTS: Registry
// =============================================================================

pub use registry::{Registry, RegistryBackend, RegistryCounts, RegistrySnapshot};
pub use storage::RedbRegistry;
