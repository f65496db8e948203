use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::info;

/// Liveness tracking for the gateway's background loops.
///
/// Each loop (publish workers, the rdkafka client) registers a component
/// with a deadline and must keep reporting before it passes. The process is
/// live only while every component is. This is separate from `/health`,
/// which describes dependencies and always answers 200.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, never reported
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its HealthyUntil deadline
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more often than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        let mut components = self.components.write().unwrap_or_else(|e| e.into_inner());
        components.insert(self.component.clone(), status);
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        HealthRegistry {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let mut components = self.components.write().unwrap_or_else(|e| e.into_inner());
        components.insert(component.clone(), ComponentStatus::Starting);
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    /// Overdue components are flipped to Stalled as a side effect.
    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let mut components = self.components.write().unwrap_or_else(|e| e.into_inner());

        let mut healthy = !components.is_empty();
        for (name, status) in components.iter_mut() {
            match status {
                ComponentStatus::HealthyUntil(until) if *until > now => {}
                ComponentStatus::HealthyUntil(_) => {
                    info!("{} component {} stalled", self.name, name);
                    *status = ComponentStatus::Stalled;
                    healthy = false;
                }
                _ => healthy = false,
            }
        }

        HealthStatus {
            healthy,
            components: components.clone(),
        }
    }
}
