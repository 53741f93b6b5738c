//! Controller module for fragment reconciliation
//! This module contains the store access layer, the merge engine and the
//! reconcile loop that keeps Consul composites in line with their fragments.

pub mod accessor;
mod finalizers;
pub mod fingerprint;
pub mod merge;
#[cfg(test)]
mod merge_test;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
#[cfg(test)]
pub(crate) mod testing;

pub use accessor::{is_being_deleted, KubeAccessor, ResourceAccessor};
pub use finalizers::{has_finalizer, reconcile_finalizer};
pub use fingerprint::fingerprint;
pub use merge::{MergeOutcome, Merger, PatchFn};
pub use reconciler::{
    aggregation_key, run_controller, ControllerConfig, ControllerState, Disposition,
    FragmentContext, FragmentReconciler, ReconcileIntent, ReconcileReport,
};
