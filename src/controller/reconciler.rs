//! Reconciler for fragment resources
//!
//! [`FragmentReconciler`] is the per-event control loop: it reloads the
//! triggering fragment, collects its live siblings, hands them to the merge
//! engine and then settles the fragment's own finalizer and status. The
//! kube-rs `Controller` wiring for both fragment kinds lives at the bottom.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
    Client, Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::accessor::{is_being_deleted, KubeAccessor, ResourceAccessor};
use super::finalizers::{has_finalizer, reconcile_finalizer};
use super::fingerprint::fingerprint;
use super::merge::{MergeOutcome, Merger};
use crate::crd::{
    stamp_destination, ConsulServiceIntentionsSource, ConsulServiceRoute, FragmentResource,
    FragmentStatus, StoredResource,
};
use crate::error::{Error, Result};

/// Why a reconcile ran, derived from the fragment's recorded fingerprint.
/// Only reported, never branched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileIntent {
    Create,
    Change,
    Delete,
    DependencyChange,
}

impl ReconcileIntent {
    fn classify(is_new: bool, is_changed: bool, is_deleted: bool) -> Self {
        if is_new {
            ReconcileIntent::Create
        } else if is_changed {
            ReconcileIntent::Change
        } else if is_deleted {
            ReconcileIntent::Delete
        } else {
            ReconcileIntent::DependencyChange
        }
    }
}

impl fmt::Display for ReconcileIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileIntent::Create => "create",
            ReconcileIntent::Change => "change",
            ReconcileIntent::Delete => "delete",
            ReconcileIntent::DependencyChange => "triggered by dependency change",
        })
    }
}

/// Whether the caller should schedule another pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Done,
    Requeue,
}

/// Everything a single reconcile did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `None` when the fragment no longer exists
    pub intent: Option<ReconcileIntent>,
    pub merge: Option<MergeOutcome>,
    pub finalizer_changed: bool,
    pub status_written: bool,
    pub disposition: Disposition,
}

impl ReconcileReport {
    fn gone() -> Self {
        Self {
            intent: None,
            merge: None,
            finalizer_changed: false,
            status_written: false,
            disposition: Disposition::Done,
        }
    }

    fn requeue(intent: ReconcileIntent) -> Self {
        Self {
            intent: Some(intent),
            disposition: Disposition::Requeue,
            ..Self::gone()
        }
    }

    pub fn needs_retry(&self) -> bool {
        self.disposition == Disposition::Requeue
    }
}

/// Errors a fresh read on the next pass is expected to clear
fn clears_on_retry(err: &Error) -> bool {
    err.is_retriable() || matches!(err, Error::AlreadyExists { .. } | Error::NotFound { .. })
}

/// Control loop for one fragment kind
pub struct FragmentReconciler<F: FragmentResource> {
    fragments: Arc<dyn ResourceAccessor<F>>,
    merger: Merger<F::Composite>,
}

impl<F: FragmentResource> FragmentReconciler<F> {
    pub fn new(fragments: Arc<dyn ResourceAccessor<F>>, merger: Merger<F::Composite>) -> Self {
        Self { fragments, merger }
    }

    /// Reconcile the fragment `namespace`/`name`
    #[instrument(skip(self), fields(kind = %F::kind(&())))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileReport> {
        let kind = F::kind(&());

        let Some(mut fragment) = self.fragments.get(namespace, name).await? else {
            info!("{} {}/{} not found, object must be deleted", kind, namespace, name);
            return Ok(ReconcileReport::gone());
        };

        let current = fingerprint(fragment.spec_value())?;
        let recorded = fragment
            .fragment_status()
            .and_then(FragmentStatus::fingerprint)
            .map(str::to_string);
        let is_deleted = is_being_deleted(&fragment);
        let is_changed = recorded.as_deref() != Some(current.as_str());
        let intent = ReconcileIntent::classify(recorded.is_none(), is_changed, is_deleted);
        info!("Reconcile action for {} {}/{} is: {}", kind, namespace, name, intent);

        let key = match aggregation_key(&fragment) {
            Ok(key) => key,
            Err(e) => {
                if is_deleted && has_finalizer(&fragment, F::FINALIZER) {
                    warn!(
                        "{} {}/{} is being deleted without its {} label, holding finalizer {}",
                        kind,
                        namespace,
                        name,
                        F::KEY_LABEL,
                        F::FINALIZER
                    );
                }
                return Err(e);
            }
        };

        let outcome = match self.merge_key(namespace, &key).await {
            Ok(outcome) => outcome,
            Err(e) if clears_on_retry(&e) => {
                warn!(
                    "Failed to merge {} into {} {}/{}: {}, will retry",
                    kind,
                    <F::Composite as Resource>::kind(&()),
                    namespace,
                    key,
                    e
                );
                return Ok(ReconcileReport::requeue(intent));
            }
            Err(e) => return Err(e),
        };

        // A relabelled fragment must leave the composite it used to feed
        if let Some(uid) = fragment.uid() {
            match self.release_stale(namespace, &uid, &key).await {
                Ok(()) => {}
                Err(e) if clears_on_retry(&e) => {
                    warn!(
                        "Failed to release {} {}/{} from previous composites: {}, will retry",
                        kind, namespace, name, e
                    );
                    return Ok(ReconcileReport::requeue(intent));
                }
                Err(e) => return Err(e),
            }
        }

        let finalizer_changed =
            reconcile_finalizer(self.fragments.as_ref(), &mut fragment, F::FINALIZER)
                .await
                .map_err(|e| {
                    error!("Failed to update the finalizer of {} {}: {}", kind, name, e);
                    e
                })?;

        let mut status_written = false;
        if !is_deleted && is_changed {
            fragment.set_fragment_status(FragmentStatus {
                content_fingerprint: Some(current),
                last_synced_at: Some(chrono::Utc::now().to_rfc3339()),
            });
            debug!("Updating the status of {} {}/{}", kind, namespace, name);
            self.fragments
                .update_status(&fragment)
                .await
                .map_err(|e| {
                    error!("Failed to update the status of {} {}: {}", kind, name, e);
                    e
                })?;
            status_written = true;
        }

        Ok(ReconcileReport {
            intent: Some(intent),
            merge: Some(outcome),
            finalizer_changed,
            status_written,
            disposition: Disposition::Done,
        })
    }

    /// Merge the composite `key` from its current live fragments
    async fn merge_key(&self, namespace: &str, key: &str) -> Result<MergeOutcome> {
        let siblings = self.collect_siblings(namespace, key).await?;
        self.merger.merge(key, namespace, &siblings).await
    }

    /// Re-merge every other composite still owned by `uid`
    async fn release_stale(&self, namespace: &str, uid: &str, key: &str) -> Result<()> {
        for stale in self.merger.stale_keys(namespace, uid, key).await? {
            let outcome = self.merge_key(namespace, &stale).await?;
            info!(
                "{} {}/{} no longer owned by {}: {}",
                <F::Composite as Resource>::kind(&()),
                namespace,
                stale,
                uid,
                outcome
            );
        }
        Ok(())
    }

    /// Live fragments sharing `key`; deleting ones no longer contribute
    async fn collect_siblings(&self, namespace: &str, key: &str) -> Result<Vec<F>> {
        let listed = self
            .fragments
            .list_by_label(namespace, F::KEY_LABEL, key)
            .await?;
        Ok(listed
            .into_iter()
            .filter(|f| !is_being_deleted(f))
            .collect())
    }
}

/// Value of the aggregation-key label, which must be present and non-empty
pub fn aggregation_key<F: FragmentResource>(fragment: &F) -> Result<String> {
    fragment
        .labels()
        .get(F::KEY_LABEL)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| Error::BadRequest(format!("{} label is required", F::KEY_LABEL)))
}

/// Timing and scoping knobs for the controllers
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Restrict watches to one namespace; `None` watches the whole cluster
    pub namespace: Option<String>,
    /// Delay before retrying a pass that asked for a requeue
    pub requeue_after: Duration,
    /// Delay after an unclassified error
    pub error_requeue_after: Duration,
    pub reconcile_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_after: Duration::from_secs(15),
            error_requeue_after: Duration::from_secs(60),
            reconcile_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared controller state
pub struct ControllerState {
    pub client: Client,
    pub config: ControllerConfig,
    /// Flipped by the lease loop; followers never touch the store
    pub is_leader: Arc<AtomicBool>,
}

/// Per-kind state handed to the kube-rs controller
pub struct FragmentContext<F: FragmentResource> {
    pub reconciler: FragmentReconciler<F>,
    pub state: Arc<ControllerState>,
    /// Controller name used in logs and metrics, e.g. "consulserviceroute"
    pub controller: &'static str,
}

impl<F: FragmentResource> FragmentContext<F> {
    fn config(&self) -> &ControllerConfig {
        &self.state.config
    }
}

/// Main entry point to start both fragment controllers
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();

    ensure_crd_installed::<ConsulServiceRoute>(&state).await?;
    ensure_crd_installed::<ConsulServiceIntentionsSource>(&state).await?;

    let routes = Arc::new(FragmentContext {
        reconciler: FragmentReconciler::new(
            Arc::new(KubeAccessor::<ConsulServiceRoute>::new(client.clone())),
            Merger::new(Arc::new(KubeAccessor::new(client.clone()))),
        ),
        state: state.clone(),
        controller: "consulserviceroute",
    });

    let intentions = Arc::new(FragmentContext {
        reconciler: FragmentReconciler::new(
            Arc::new(KubeAccessor::<ConsulServiceIntentionsSource>::new(
                client.clone(),
            )),
            Merger::new(Arc::new(KubeAccessor::new(client))).with_patch(stamp_destination),
        ),
        state,
        controller: "consulserviceintentionssource",
    });

    info!("Starting fragment controllers");
    futures::join!(run_fragment_controller(routes), run_fragment_controller(intentions));
    Ok(())
}

async fn ensure_crd_installed<F: FragmentResource>(state: &ControllerState) -> Result<()> {
    let api: Api<F> = Api::all(state.client.clone());
    match api.list(&Default::default()).await {
        Ok(_) => {
            info!("{} CRD is available", F::kind(&()));
            Ok(())
        }
        Err(e) => {
            error!(
                "{} CRD not found. Please install the CRD first: {:?}",
                F::kind(&()),
                e
            );
            Err(Error::ConfigError(format!("{} CRD not installed", F::kind(&()))))
        }
    }
}

fn apis<K: StoredResource>(state: &ControllerState) -> Api<K> {
    match &state.config.namespace {
        Some(namespace) => Api::namespaced(state.client.clone(), namespace),
        None => Api::all(state.client.clone()),
    }
}

async fn run_fragment_controller<F: FragmentResource>(ctx: Arc<FragmentContext<F>>) {
    let fragments: Api<F> = apis(&ctx.state);
    let composites: Api<F::Composite> = apis(&ctx.state);
    let controller = ctx.controller;

    info!("Starting {} controller", controller);

    Controller::new(fragments, Config::default())
        // Drift on a composite re-triggers every fragment it lists as owner
        .watches(composites, Config::default(), owners_of::<F>)
        .shutdown_on_signal()
        .run(reconcile::<F>, error_policy::<F>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}: {}", controller, obj),
                Err(e) => warn!("Reconcile error in {}: {:?}", controller, e),
            }
        })
        .await;
}

/// Fragments a composite lists as its owners
fn owners_of<F: FragmentResource>(composite: F::Composite) -> Vec<ObjectRef<F>> {
    let namespace = composite.namespace();
    composite
        .owner_references()
        .iter()
        .filter(|owner| owner.kind == F::kind(&()) && owner.api_version == F::api_version(&()))
        .map(|owner| {
            let reference = ObjectRef::new(&owner.name);
            match &namespace {
                Some(ns) => reference.within(ns),
                None => reference,
            }
        })
        .collect()
}

/// The function the kube-rs controller calls for every fragment event
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = ?obj.namespace()))]
async fn reconcile<F: FragmentResource>(
    obj: Arc<F>,
    ctx: Arc<FragmentContext<F>>,
) -> Result<Action> {
    let config = ctx.config();

    if !ctx.state.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}", obj.name_any());
        return Ok(Action::requeue(config.requeue_after));
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    let started = Instant::now();

    let result = tokio::time::timeout(
        config.reconcile_timeout,
        ctx.reconciler.reconcile(&namespace, &name),
    )
    .await
    .unwrap_or_else(|_| Err(Error::Timeout(format!("{}/{}", namespace, name))));

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile(ctx.controller, started.elapsed().as_secs_f64(), &result);

    let report = result?;
    debug!(
        "Reconciled {}/{} in {:?}: {:?}",
        namespace,
        name,
        started.elapsed(),
        report
    );

    Ok(match report.disposition {
        Disposition::Done => Action::await_change(),
        Disposition::Requeue => Action::requeue(config.requeue_after),
    })
}

/// Error policy determines how to handle reconciliation errors
fn error_policy<F: FragmentResource>(
    obj: Arc<F>,
    error: &Error,
    ctx: Arc<FragmentContext<F>>,
) -> Action {
    let config = ctx.config();

    if error.is_terminal() {
        // Nothing changes until someone edits the fragment
        warn!(
            "Reconciliation of {} {} needs manual intervention: {}",
            F::kind(&()),
            obj.name_any(),
            error
        );
        return Action::await_change();
    }

    error!(
        "Reconciliation error for {} {}: {:?}",
        F::kind(&()),
        obj.name_any(),
        error
    );

    if error.is_retriable() {
        Action::requeue(config.requeue_after)
    } else {
        Action::requeue(config.error_requeue_after)
    }
}
