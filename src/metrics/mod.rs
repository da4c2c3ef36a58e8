//! Metrics and monitoring for the tandem-match service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health, metrics and match API endpoints.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics,
    ServiceMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};
