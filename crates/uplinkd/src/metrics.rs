//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  - Prometheus text format
//!   GET /healthz  - Liveness probe (always 200 if process is running)
//!   GET /readyz   - Readiness probe (200 if the upload target is reachable)

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;
use tracing::warn;

use uplink_core::types::{RunSummary, TaskState};
use uplink_core::UplinkError;
use uplink_sync::{NetworkMonitor, RunObserver, StatusReporter};

type Labels = Vec<(String, String)>;

// ── Metrics ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SyncMetrics {
    runs: Family<Labels, Counter>,
    attempts: Family<Labels, Counter>,
    queue: Family<Labels, Gauge>,
    reporter: Arc<StatusReporter>,
}

impl SyncMetrics {
    pub fn new(registry: &mut Registry, reporter: Arc<StatusReporter>) -> Self {
        let runs = Family::default();
        let attempts = Family::default();
        let queue = Family::default();

        registry.register(
            "uplink_runs",
            "Processing runs by outcome",
            runs.clone(),
        );
        registry.register(
            "uplink_task_attempts",
            "Upload attempts by result",
            attempts.clone(),
        );
        registry.register(
            "uplink_queue_tasks",
            "Tasks currently in the queue by state",
            queue.clone(),
        );

        SyncMetrics {
            runs,
            attempts,
            queue,
            reporter,
        }
    }

    fn labels(key: &str, value: &str) -> Labels {
        vec![(key.to_string(), value.to_string())]
    }

    /// Recompute the per-state queue gauges from the store.
    pub fn refresh_queue(&self) {
        let snap = match self.reporter.snapshot() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "metrics: queue snapshot failed");
                return;
            }
        };
        for (state, count) in [
            (TaskState::Queued, snap.pending),
            (TaskState::Processing, snap.processing),
            (TaskState::Completed, snap.completed),
            (TaskState::Failed, snap.failed),
        ] {
            self.queue
                .get_or_create(&Self::labels("state", state.as_str()))
                .set(count as i64);
        }
    }
}

impl RunObserver for SyncMetrics {
    fn run_finished(&self, summary: &RunSummary) {
        self.runs.get_or_create(&Self::labels("outcome", "ok")).inc();
        self.attempts
            .get_or_create(&Self::labels("result", "success"))
            .inc_by(summary.succeeded as u64);
        self.attempts
            .get_or_create(&Self::labels("result", "failure"))
            .inc_by(summary.failed as u64);
        self.refresh_queue();
    }

    fn run_failed(&self, _error: &UplinkError) {
        self.runs
            .get_or_create(&Self::labels("outcome", "error"))
            .inc();
        self.refresh_queue();
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────────

/// Shared health state for the metrics routes
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub metrics: SyncMetrics,
    pub network: Arc<dyn NetworkMonitor>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    state.metrics.refresh_queue();
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: 200 while the upload target is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if state.network.is_online() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable")
    }
}
