//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and WebSocket session:
//! the live configuration, process-wide request metrics, the realtime session
//! registry, and the server start time.
//!
//! Configuration and metrics sit behind `Arc<RwLock<…>>` so many requests can
//! read concurrently while updates stay exclusive. The registry manages its
//! own interior locking; requests never share any other mutable state.

use crate::config::AppConfig;
use crate::realtime::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (readable by every request)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request counters, updated by the telemetry middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Lifecycle bookkeeping for active realtime sessions
    pub registry: Arc<SessionRegistry>,

    /// When the server started (never changes)
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Batch transcription requests accepted for processing
    pub transcribe_requests: u64,

    /// Batch transcription requests that ended in a failure response
    pub transcribe_failures: u64,

    /// Per-endpoint statistics, keyed by "METHOD path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: Arc::new(SessionRegistry::new()),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other requests are never
    /// blocked on a handler holding configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record a batch transcription attempt and, later, its failure.
    pub fn record_transcription_request(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.transcribe_requests += 1;
    }

    pub fn record_transcription_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.transcribe_failures += 1;
    }

    /// Record detailed metrics for a specific endpoint.
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

    /// Get a snapshot of current metrics for the health endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            transcribe_requests: metrics.transcribe_requests,
            transcribe_failures: metrics.transcribe_failures,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_transcription_request();
        state.record_transcription_failure();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.transcribe_requests, 1);
        assert_eq!(snapshot.transcribe_failures, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("POST /transcribe", 100, false);
        state.record_endpoint_request("POST /transcribe", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /transcribe"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
