//! # Application State
//!
//! Shared state handed to every request handler: the configuration, the
//! request metrics, and the injected services (notification registry,
//! record store, batch processor). Services are constructed once at startup
//! and shared by `Arc`, so tests can build isolated instances with doubles
//! in place of the real engine or store.

use crate::batch::BatchProcessor;
use crate::config::AppConfig;
use crate::db::TranscriptionStore;
use crate::notify::NotificationRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub registry: Arc<NotificationRegistry>,
    pub store: TranscriptionStore,
    pub processor: Arc<BatchProcessor>,
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP traffic.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Currently open notification channels.
    pub active_channels: u32,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: TranscriptionStore,
        registry: Arc<NotificationRegistry>,
        processor: Arc<BatchProcessor>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry,
            store,
            processor,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_channels(&self) {
        self.metrics.write().unwrap().active_channels += 1;
    }

    pub fn decrement_active_channels(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_channels > 0 {
            metrics.active_channels -= 1;
        }
    }

    /// Consistent copy of the metrics, taken under the read lock so
    /// serialization never races an update.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_channels: metrics.active_channels,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
