//! Prometheus metrics for the merge operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `consul_merge_reconcile_duration_seconds` (histogram): reconcile duration
//!   labeled by controller.
//! - `consul_merge_outcomes_total` (counter): composite merge results labeled
//!   by controller and outcome.
//! - `consul_merge_reconcile_errors_total` (counter): reconcile errors labeled
//!   by controller and kind.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::reconciler::ReconcileReport;
use crate::error::Result;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "consulserviceroute"
    pub controller: String,
}

/// Labels for merge outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub controller: String,
    /// "created", "updated", "deleted", "noop" or "requeue"
    pub outcome: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error category, e.g. "conflict", "bad_request", "kube"
    pub kind: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking what each merge did to its composite
pub static MERGE_OUTCOMES_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "consul_merge_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );

    registry.register(
        "consul_merge_outcomes",
        "Composite merge results by outcome",
        MERGE_OUTCOMES_TOTAL.clone(),
    );

    registry.register(
        "consul_merge_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

pub fn inc_merge_outcome(controller: &str, outcome: &str) {
    let labels = OutcomeLabels {
        controller: controller.to_string(),
        outcome: outcome.to_string(),
    };
    MERGE_OUTCOMES_TOTAL.get_or_create(&labels).inc();
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Record everything one reconcile pass produced
pub fn observe_reconcile(controller: &str, seconds: f64, result: &Result<ReconcileReport>) {
    observe_reconcile_duration_seconds(controller, seconds);
    match result {
        Ok(report) if report.needs_retry() => inc_merge_outcome(controller, "requeue"),
        Ok(report) => {
            if let Some(outcome) = report.merge {
                inc_merge_outcome(controller, outcome.as_str());
            }
        }
        Err(e) => inc_reconcile_error(controller, e.kind_label()),
    }
}
