//! # Health and Metrics Endpoints
//!
//! Operational JSON for monitoring: overall service health at `/health` and
//! per-endpoint request statistics at `/metrics`. Neither endpoint touches the
//! upstream services; upstream reachability only shows up through the request
//! counters.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry.summary();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "speech-chat-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "transcribe_requests": metrics.transcribe_requests,
            "transcribe_failures": metrics.transcribe_failures,
            "active_realtime_sessions": registry.active_sessions
        },
        "upstream": {
            "configured": config.has_upstream_credential(),
            "base_url": config.upstream.base_url,
            "batch_model": config.upstream.batch_model
        },
        "limits": {
            "max_upload_bytes": config.limits.max_upload_bytes,
            "chunk_ceiling_bytes": config.limits.chunk_ceiling_bytes
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry.summary();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let session_states: serde_json::Map<String, serde_json::Value> = registry
        .state_counts
        .iter()
        .map(|(state, count)| (state.to_string(), json!(count)))
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "transcription": {
            "requests": metrics.transcribe_requests,
            "failures": metrics.transcribe_failures
        },
        "realtime": {
            "active_sessions": registry.active_sessions,
            "session_states": session_states
        },
        "endpoints": endpoint_stats
    }))
}
