//! # Meshwork Control Plane
//!
//! Async surfaces over `meshwork-core`: the shared service registry, the
//! service mesh client, the API gateway, the event bus and the orchestrator
//! that wires them together.
//!
//! ```text
//!                 ┌────────────────────────────┐
//!                 │        Orchestrator        │
//!                 └──┬───────┬───────┬──────┬──┘
//!                    │       │       │      │
//!          ┌─────────▼─┐ ┌───▼───┐ ┌─▼────┐ ┌▼─────────┐
//!          │  Registry │ │ Mesh  │ │ Gate │ │ EventBus │
//!          │ (+ HTTP)  │ │       │ │ way  │ │          │
//!          └─────┬─────┘ └───┬───┘ └──┬───┘ └────┬─────┘
//!                └───────────┴────────┴──────────┘
//!                              ▼
//!                       meshwork-core
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod api;
pub mod config;
pub mod events;
pub mod gateway;
pub mod inference;
pub mod mesh;
pub mod orchestrator;
pub mod registry;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::MeshworkConfig;
pub use events::{BusStats, EventBus, EventBusConfig};
pub use gateway::{ApiGateway, GatewayRequest, GatewayResponse, ServiceEndpoint};
pub use inference::{HttpInferenceClient, InferenceService};
pub use mesh::{MeshConfig, MeshResponse, ServiceCall, ServiceMesh};
pub use orchestrator::{Orchestrator, OrchestratorState, SystemStatus};
pub use registry::{RegistryNotification, ServiceRegistry};
