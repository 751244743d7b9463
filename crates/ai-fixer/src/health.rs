//! HTTP health and status endpoints.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::aggregator::ErrorAggregator;
use crate::orchestrator::CycleOutcome;

/// Counters describing what the remediation loop has done so far.
#[derive(Debug, Default)]
pub struct FixerStats {
    ready: AtomicBool,
    cycles_started: AtomicU64,
    change_requests: AtomicU64,
    humans_notified: AtomicU64,
    cycles_aborted: AtomicU64,
    fixes_not_extracted: AtomicU64,
    escalation_failures: AtomicU64,
    last_outcome: Mutex<Option<&'static str>>,
}

impl FixerStats {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished cycle by its outcome.
    pub fn record(&self, outcome: &CycleOutcome) {
        let counter = match outcome {
            CycleOutcome::Aborted { .. } => &self.cycles_aborted,
            CycleOutcome::NoFixExtracted => &self.fixes_not_extracted,
            CycleOutcome::ChangeRequested { .. } => &self.change_requests,
            CycleOutcome::HumanNotified { .. } => &self.humans_notified,
            CycleOutcome::EscalationFailed { .. } => &self.escalation_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.label());
    }

    fn snapshot(&self) -> Value {
        let last = *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        json!({
            "cycles_started": self.cycles_started.load(Ordering::Relaxed),
            "change_requests": self.change_requests.load(Ordering::Relaxed),
            "humans_notified": self.humans_notified.load(Ordering::Relaxed),
            "cycles_aborted": self.cycles_aborted.load(Ordering::Relaxed),
            "fixes_not_extracted": self.fixes_not_extracted.load(Ordering::Relaxed),
            "escalation_failures": self.escalation_failures.load(Ordering::Relaxed),
            "last_outcome": last,
        })
    }
}

#[derive(Clone)]
struct HealthState {
    stats: Arc<FixerStats>,
    aggregator: Arc<ErrorAggregator>,
}

/// Build the router serving `/health`, `/ready` and `/status`.
pub fn router(stats: Arc<FixerStats>, aggregator: Arc<ErrorAggregator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(status))
        .with_state(HealthState { stats, aggregator })
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "ai-fixer",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<HealthState>) -> Result<Json<Value>, StatusCode> {
    if !state.stats.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "ai-fixer",
    })))
}

async fn status(State(state): State<HealthState>) -> Json<Value> {
    let mut body = state.stats.snapshot();
    body["buffered_lines"] = json!(state.aggregator.len());
    Json(body)
}
