//! Instance health checks.
//!
//! Each registered instance's `health_check_url` is polled; 2xx means
//! HEALTHY, any other status DEGRADED, and a transport error or timeout
//! UNHEALTHY. Instances are never removed here, and DRAINING instances are
//! left alone.

use super::ServiceMesh;
use meshwork_core::{InstanceId, ServiceState};
use serde::Serialize;

/// Result of probing one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckOutcome {
    pub id: InstanceId,
    pub service: String,
    pub state: ServiceState,
    pub changed: bool,
}

impl ServiceMesh {
    async fn probe(&self, url: &str) -> ServiceState {
        match self
            .client
            .get(url)
            .timeout(self.config.health_check_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ServiceState::Healthy,
            Ok(response) => {
                tracing::debug!(%url, status = response.status().as_u16(), "Health check degraded");
                ServiceState::Degraded
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "Health check failed");
                ServiceState::Unhealthy
            }
        }
    }

    /// Run one health-check cycle over every registered instance.
    pub async fn check_all(&self) -> Vec<HealthCheckOutcome> {
        let instances = self.registry.list().await;
        let mut outcomes = Vec::with_capacity(instances.len());

        for instance in instances {
            if matches!(
                instance.state,
                ServiceState::Draining | ServiceState::Terminated
            ) {
                continue;
            }

            let state = self.probe(&instance.health_check_url).await;
            let changed = match self.registry.update_state(&instance.id, state).await {
                Ok(changed) => changed,
                Err(e) => {
                    // Deregistered while the probe was in flight.
                    tracing::debug!(id = %instance.id, error = %e, "Skipping health update");
                    continue;
                }
            };
            if changed && state == ServiceState::Unhealthy {
                tracing::warn!(service = %instance.name, id = %instance.id, "Instance unhealthy");
            }

            outcomes.push(HealthCheckOutcome {
                id: instance.id,
                service: instance.name,
                state,
                changed,
            });
        }
        outcomes
    }
}
