//! Process health probes
//!
//! Liveness/readiness tracking for the monitor process itself, served
//! on the daemon's probe endpoints. This is deliberately separate from
//! per-model [`ModelHealth`](crate::models::ModelHealth): a perfectly
//! healthy monitor can be tracking badly degraded models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status of one process component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Status and context for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentProbe {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp_ms: i64,
}

impl ComponentProbe {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp_ms: crate::now_ms(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp_ms: crate::now_ms(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp_ms: crate::now_ms(),
        }
    }
}

/// Aggregate probe report for `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentProbe>,
}

impl ProbeReport {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentProbe>) -> ComponentStatus {
        let mut has_degraded = false;

        for probe in components.values() {
            match probe.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness report for `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names used by the daemon
pub mod components {
    pub const STORE: &str = "store";
    pub const MONITOR_LOOP: &str = "monitor_loop";
    pub const INGESTION: &str = "ingestion";
}

/// Registry of component probes
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    components: Arc<RwLock<HashMap<String, ComponentProbe>>>,
    ready: Arc<RwLock<bool>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentProbe::healthy());
    }

    /// Update a component's probe
    pub async fn update(&self, name: &str, probe: ComponentProbe) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), probe);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentProbe::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentProbe::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentProbe::unhealthy(message)).await;
    }

    /// Flip readiness once startup has completed
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn report(&self) -> ProbeReport {
        let components = self.components.read().await.clone();
        let status = ProbeReport::compute_status(&components);
        ProbeReport { status, components }
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let ready = *self.ready.read().await;
        let report = self.report().await;

        let critical_healthy = report.status != ComponentStatus::Unhealthy;

        if !ready {
            ReadinessReport {
                ready: false,
                reason: Some("Monitor not yet initialized".to_string()),
            }
        } else if !critical_healthy {
            ReadinessReport {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessReport {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_initial_state() {
        let registry = ProbeRegistry::new();
        let report = registry.report().await;

        assert_eq!(report.status, ComponentStatus::Healthy);
        assert!(report.components.is_empty());
    }

    #[tokio::test]
    async fn test_component_registration() {
        let registry = ProbeRegistry::new();
        registry.register(components::STORE).await;

        let report = registry.report().await;
        assert!(report.components.contains_key(components::STORE));
        assert_eq!(
            report.components[components::STORE].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_degraded_component_degrades_overall() {
        let registry = ProbeRegistry::new();
        registry.register(components::STORE).await;
        registry.register(components::MONITOR_LOOP).await;

        registry
            .set_degraded(components::MONITOR_LOOP, "Slow cycle")
            .await;

        let report = registry.report().await;
        assert_eq!(report.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_unhealthy_component_fails_overall() {
        let registry = ProbeRegistry::new();
        registry.register(components::STORE).await;
        registry.register(components::MONITOR_LOOP).await;

        registry
            .set_unhealthy(components::STORE, "Data dir unwritable")
            .await;

        let report = registry.report().await;
        assert_eq!(report.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_requires_set_ready() {
        let registry = ProbeRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
    }

    #[tokio::test]
    async fn test_readiness_fails_when_unhealthy() {
        let registry = ProbeRegistry::new();
        registry.register(components::STORE).await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::STORE, "Failed").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
    }
}
