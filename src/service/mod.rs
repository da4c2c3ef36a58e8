//! Service layer for the tandem-match service
//!
//! This module contains the main application state, the HTTP API, health
//! checks and background task management for the production service.

pub mod api;
pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus};
