//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the tandem-match
//! service, including readiness and liveness checks.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Participants currently waiting
    pub participants_waiting: usize,
    /// Rooms in the registry
    pub rooms_total: usize,
    /// Pairings committed since service start
    pub matches_made: u64,
    /// Requests answered with pending since service start
    pub pending_responses: u64,
    /// Pairing attempts lost to concurrent requests
    pub candidate_races: u64,
    /// Service uptime in seconds
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(&app_state).await;
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        for component in [
            Self::check_queue_store(&app_state).await,
            Self::check_room_registry(&app_state).await,
            Self::check_match_engine(&app_state).await,
        ] {
            if component.status == HealthStatus::Unhealthy {
                overall_status = HealthStatus::Unhealthy;
            } else if component.status == HealthStatus::Degraded
                && overall_status == HealthStatus::Healthy
            {
                overall_status = HealthStatus::Degraded;
            }
            checks.push(component);
        }

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify both stores answer
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let queue = Self::check_queue_store(&app_state).await.status;
        let rooms = Self::check_room_registry(&app_state).await.status;

        Ok(match (queue, rooms) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                HealthStatus::Unhealthy
            }
            _ => HealthStatus::Degraded,
        })
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_queue_store(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.engine().queue().len().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue store check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Queue store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "queue_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_room_registry(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.engine().rooms().room_count().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Room registry check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Room registry unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "room_registry".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The engine is degraded when most pairing attempts lose races
    async fn check_match_engine(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.engine().get_stats().await {
            Ok(stats) if stats.match_requests > 10 && stats.candidate_races > stats.match_requests => (
                HealthStatus::Degraded,
                Some(format!(
                    "High contention: {} races over {} requests",
                    stats.candidate_races, stats.match_requests
                )),
            ),
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Match engine stats check failed: {}", e);
                (
                    HealthStatus::Degraded,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "match_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let uptime_seconds = app_state.uptime().as_secs();

        match app_state.engine().get_stats().await {
            Ok(stats) => ServiceStats {
                participants_waiting: stats.participants_waiting,
                rooms_total: stats.rooms_total,
                matches_made: stats.matches_made,
                pending_responses: stats.pending_responses,
                candidate_races: stats.candidate_races,
                uptime_seconds,
            },
            Err(e) => {
                debug!("Failed to get engine stats for health check: {}", e);
                ServiceStats {
                    uptime_seconds,
                    ..ServiceStats::default()
                }
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
