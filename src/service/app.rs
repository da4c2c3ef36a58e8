//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the stores, the
//! matching engine, the HTTP server and the background maintenance tasks.

use crate::config::AppConfig;
use crate::matching::{MatchEngine, MatchingConfig};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::store::{InMemoryQueueStore, InMemoryRoomRegistry, QueueStore, RoomRegistry};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interval for refreshing gauges from engine statistics
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Interval for uptime and component health metrics
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core matching engine
    engine: Arc<MatchEngine>,

    /// Metrics collector shared with the engine and the HTTP server
    metrics_collector: Arc<MetricsCollector>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Shutdown signal for the running HTTP server
    http_shutdown: Mutex<Option<broadcast::Sender<()>>>,

    /// Service start time
    started_at: Instant,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with in-memory stores
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        Self::with_stores(
            config,
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(InMemoryRoomRegistry::new()),
        )
    }

    /// Initialize the application on top of the given stores
    pub fn with_stores(
        config: AppConfig,
        queue: Arc<dyn QueueStore>,
        rooms: Arc<dyn RoomRegistry>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing tandem-match service");
        info!(
            "Configuration: service={}, http_port={}, max_match_attempts={}",
            config.service.name, config.service.http_port, config.matchmaking.max_match_attempts
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let engine = MatchEngine::with_metrics(queue, rooms, metrics_collector.clone())
            .with_config(MatchingConfig::from(&config.matchmaking));

        Ok(Self {
            config,
            engine: Arc::new(engine),
            metrics_collector,
            background_tasks: Mutex::new(Vec::new()),
            http_shutdown: Mutex::new(None),
            started_at: Instant::now(),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the HTTP server and all background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting tandem-match service");

        self.start_background_tasks().await?;
        self.start_http_server().await?;

        info!("✅ Tandem-match service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of tandem-match service");

        *self.is_running.write().await = false;

        if let Some(shutdown_tx) = self.http_shutdown.lock().await.take() {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("Failed to signal HTTP server shutdown: {}", e);
            } else {
                info!("✅ HTTP server stop signal sent");
            }
        }

        self.stop_background_tasks().await;

        let final_stats =
            self.engine
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Tandem-match service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get the matching engine
    pub fn engine(&self) -> Arc<MatchEngine> {
        self.engine.clone()
    }

    /// Get the metrics collector
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// Time since the service was initialized
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Spawn the HTTP server serving the match API, health and metrics
    async fn start_http_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.http_port;
        info!("Starting HTTP server on port {}", port);

        let server_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let server = HealthServer::new(server_config, self.metrics_collector.clone())
            .with_app_state(self.clone());

        *self.http_shutdown.lock().await = Some(server.shutdown_sender());

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });
        self.background_tasks.lock().await.push(server_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ HTTP server started on port {}", port);
        Ok(())
    }

    /// Start background maintenance tasks and mark the service as running
    pub async fn start_background_tasks(&self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        *self.is_running.write().await = true;

        // Expiry sweep task
        let cleanup_interval = self.config.cleanup_interval();
        info!(
            "Starting expiry sweep task ({}s interval)...",
            cleanup_interval.as_secs()
        );
        let cleanup_task = {
            let engine = self.engine.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                info!("Expiry sweep task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let timer = metrics_collector.start_timer();
                    match engine.cleanup_expired().await {
                        Ok(expired) => {
                            if expired > 0 {
                                info!("Swept {} expired participants", expired);
                            } else {
                                debug!("Expiry sweep completed - nothing to remove");
                            }
                        }
                        Err(e) => {
                            warn!("Expiry sweep failed: {}", e);
                        }
                    }
                    metrics_collector.record_cleanup(timer.stop());
                }

                info!("Expiry sweep task stopped");
            })
        };

        // Metrics refresh task
        info!(
            "Starting metrics refresh task ({}s interval)...",
            METRICS_REFRESH_INTERVAL.as_secs()
        );
        let metrics_task = {
            let engine = self.engine.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_REFRESH_INTERVAL);
                info!("Metrics refresh task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match engine.get_stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - waiting: {}, rooms: {}, matches: {}",
                                stats.participants_waiting, stats.rooms_total, stats.matches_made
                            );
                            metrics_collector.update_from_engine_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get engine stats for metrics update: {}", e);
                        }
                    }
                }

                info!("Metrics refresh task stopped");
            })
        };

        // Service health metrics task
        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );
        let health_metrics_task = {
            let engine = self.engine.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = started_at.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let queue_ok = engine.queue().len().await.is_ok();
                    let rooms_ok = engine.rooms().room_count().await.is_ok();
                    metrics_collector.update_component_health("queue_store", queue_ok);
                    metrics_collector.update_component_health("room_registry", rooms_ok);

                    let status = match (queue_ok, rooms_ok) {
                        (true, true) => 2,
                        (false, false) => 0,
                        _ => 1,
                    };
                    metrics_collector.update_health_status(status);

                    debug!(
                        "Updated service health metrics - uptime: {}s, status: {}",
                        uptime_seconds, status
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(cleanup_task);
        tasks.push(metrics_task);
        tasks.push(health_metrics_task);

        info!("3 background maintenance tasks started successfully");
        Ok(())
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
