//! Lease-based leader election
//!
//! Every replica runs the election loop; only the holder of the
//! `coordination.k8s.io/v1` Lease reconciles. Followers keep their
//! controllers warm but requeue without touching the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "consul-merge-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Identity of this replica: `HOSTNAME`, else the OS hostname
pub fn holder_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

/// Whether a lease last renewed at `renewed` has lapsed at `now`
///
/// A lease that was never renewed counts as expired.
pub fn lease_expired(
    renewed: Option<DateTime<Utc>>,
    duration_secs: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    match renewed {
        Some(renewed) => {
            let duration = duration_secs.unwrap_or(LEASE_DURATION_SECS);
            now > renewed + chrono::Duration::seconds(duration as i64)
        }
        None => true,
    }
}

/// Merge patch claiming an expired lease
///
/// Carrying the observed `resourceVersion` makes the API server reject the
/// claim when another replica updated the lease first.
pub fn takeover_patch(
    identity: &str,
    now: DateTime<Utc>,
    resource_version: Option<String>,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version,
        },
        "spec": {
            "holderIdentity": identity,
            "acquireTime": MicroTime(now),
            "renewTime": MicroTime(now),
            "leaseDurationSeconds": LEASE_DURATION_SECS,
        }
    })
}

pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: String) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity,
        }
    }

    /// Keep trying to acquire or renew the lease, publishing the result
    pub async fn run(self, is_leader: Arc<AtomicBool>) {
        info!(
            "Leader election using lease {}/{} as {}",
            self.namespace, LEASE_NAME, self.identity
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !is_leader.swap(true, Ordering::Relaxed) {
                        info!("Acquired leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if is_leader.swap(false, Ordering::Relaxed) {
                        warn!("Lost leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let Some(existing) = self.leases.get_opt(LEASE_NAME).await? else {
            self.create(now).await?;
            return Ok(true);
        };

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());

        if holder == Some(self.identity.as_str()) {
            let patch = serde_json::json!({
                "spec": {
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            });
            self.leases
                .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            return Ok(true);
        }

        let renewed = spec.and_then(|s| s.renew_time.as_ref()).map(|t| t.0);
        let duration = spec.and_then(|s| s.lease_duration_seconds);
        if !lease_expired(renewed, duration, now) {
            return Ok(false);
        }

        info!("Lease held by {:?} has expired, taking over", holder);
        let observed = existing.metadata.resource_version.clone();
        let patch = takeover_patch(&self.identity, now, observed);
        match self
            .leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            // another replica took over first
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, now: DateTime<Utc>) -> Result<(), kube::Error> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        self.leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
        Ok(())
    }
}
