//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the tandem-match service using
//! Prometheus metrics.

use crate::matching::EngineStats;
use crate::types::CancelOutcome;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting-queue metrics
    queue_metrics: QueueMetrics,

    /// Pairing metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Waiting-queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Enqueue calls by outcome (inserted, already_queued)
    pub enqueues_total: IntCounterVec,

    /// Participants currently waiting
    pub participants_waiting: IntGauge,

    /// Cancellation requests by outcome
    pub cancellations_total: IntCounterVec,

    /// Entries swept after exceeding the maximum wait
    pub expired_total: IntCounter,
}

/// Pairing metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Match requests by outcome (matched, pending, error)
    pub match_requests_total: IntCounterVec,

    /// Room resolutions by kind (created, reused)
    pub rooms_resolved_total: IntCounterVec,

    /// Rooms currently in the registry
    pub rooms_total: IntGauge,

    /// Pairing attempts lost to a concurrent attempt
    pub candidate_races_total: IntCounter,

    /// Times the store returned the requester as its own candidate
    pub self_match_faults_total: IntCounter,

    /// Eligible candidates per pairing attempt
    pub candidate_set_size: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Match request processing time by outcome
    pub match_request_duration: HistogramVec,

    /// Expiry sweep duration
    pub cleanup_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matching(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from a snapshot of engine statistics
    pub fn update_from_engine_stats(&self, stats: &EngineStats) {
        self.queue_metrics
            .participants_waiting
            .set(stats.participants_waiting as i64);

        self.match_metrics.rooms_total.set(stats.rooms_total as i64);
    }

    /// Record a processed match request
    pub fn record_match_request(&self, outcome: &str, duration: Duration) {
        self.match_metrics
            .match_requests_total
            .with_label_values(&[outcome])
            .inc();

        self.performance_metrics
            .match_request_duration
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    /// Record an enqueue call
    pub fn record_enqueue(&self, inserted: bool) {
        let outcome = if inserted { "inserted" } else { "already_queued" };
        self.queue_metrics
            .enqueues_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record how a pair's room was resolved
    pub fn record_room_resolution(&self, reused: bool) {
        let resolution = if reused { "reused" } else { "created" };
        self.match_metrics
            .rooms_resolved_total
            .with_label_values(&[resolution])
            .inc();
    }

    pub fn record_candidate_race(&self) {
        self.match_metrics.candidate_races_total.inc();
    }

    pub fn record_self_match_fault(&self, count: usize) {
        self.match_metrics
            .self_match_faults_total
            .inc_by(count as u64);
    }

    pub fn record_candidate_set_size(&self, size: usize) {
        self.match_metrics.candidate_set_size.observe(size as f64);
    }

    /// Record a cancellation request
    pub fn record_cancellation(&self, outcome: CancelOutcome) {
        let outcome_str = match outcome {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::NotQueued => "not_queued",
            CancelOutcome::PairingInProgress => "pairing_in_progress",
        };

        self.queue_metrics
            .cancellations_total
            .with_label_values(&[outcome_str])
            .inc();
    }

    /// Record entries swept by the expiry task
    pub fn record_expired(&self, count: usize) {
        self.queue_metrics.expired_total.inc_by(count as u64);
    }

    /// Record an expiry sweep duration
    pub fn record_cleanup(&self, duration: Duration) {
        self.performance_metrics
            .cleanup_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("tandem_match_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "tandem_match_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("tandem_match_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueues_total = IntCounterVec::new(
            Opts::new("tandem_match_enqueues_total", "Enqueue calls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(enqueues_total.clone()))?;

        let participants_waiting = IntGauge::new(
            "tandem_match_participants_waiting",
            "Participants currently waiting in queue",
        )?;
        registry.register(Box::new(participants_waiting.clone()))?;

        let cancellations_total = IntCounterVec::new(
            Opts::new(
                "tandem_match_cancellations_total",
                "Cancellation requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let expired_total = IntCounter::new(
            "tandem_match_expired_total",
            "Queue entries swept after exceeding the maximum wait",
        )?;
        registry.register(Box::new(expired_total.clone()))?;

        Ok(Self {
            enqueues_total,
            participants_waiting,
            cancellations_total,
            expired_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_requests_total = IntCounterVec::new(
            Opts::new(
                "tandem_match_match_requests_total",
                "Match requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(match_requests_total.clone()))?;

        let rooms_resolved_total = IntCounterVec::new(
            Opts::new(
                "tandem_match_rooms_resolved_total",
                "Room resolutions by kind",
            ),
            &["resolution"],
        )?;
        registry.register(Box::new(rooms_resolved_total.clone()))?;

        let rooms_total = IntGauge::new("tandem_match_rooms_total", "Rooms in the registry")?;
        registry.register(Box::new(rooms_total.clone()))?;

        let candidate_races_total = IntCounter::new(
            "tandem_match_candidate_races_total",
            "Pairing attempts lost to a concurrent attempt",
        )?;
        registry.register(Box::new(candidate_races_total.clone()))?;

        let self_match_faults_total = IntCounter::new(
            "tandem_match_self_match_faults_total",
            "Candidate queries that returned the requester itself",
        )?;
        registry.register(Box::new(self_match_faults_total.clone()))?;

        let candidate_set_size = Histogram::with_opts(
            HistogramOpts::new(
                "tandem_match_candidate_set_size",
                "Eligible candidates per pairing attempt",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0]),
        )?;
        registry.register(Box::new(candidate_set_size.clone()))?;

        Ok(Self {
            match_requests_total,
            rooms_resolved_total,
            rooms_total,
            candidate_races_total,
            self_match_faults_total,
            candidate_set_size,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "tandem_match_match_request_duration_seconds",
                "Match request processing time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(match_request_duration.clone()))?;

        let cleanup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "tandem_match_cleanup_duration_seconds",
                "Expiry sweep duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(cleanup_duration.clone()))?;

        Ok(Self {
            match_request_duration,
            cleanup_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
