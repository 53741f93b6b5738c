//! In-memory store and fixtures for controller tests
//!
//! `MemoryStore` behaves like a single API server collection: resource
//! versions advance on every write, stale writes fail with a conflict, and
//! objects carrying finalizers are only marked for deletion.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use super::accessor::ResourceAccessor;
use super::merge::Merger;
use super::reconciler::FragmentReconciler;
use crate::crd::{
    stamp_destination, ConsulServiceIntentionsSource, ConsulServiceIntentionsSourceSpec,
    ConsulServiceRoute, ConsulServiceRouteSpec, FragmentResource, ServiceIntentions, ServiceRoute,
    ServiceRouter, SourceIntention, StoredResource, SERVICE_INTENTIONS_LABEL, SERVICE_ROUTER_LABEL,
};
use crate::error::{Error, Result};

pub const NAMESPACE: &str = "default";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// Failure injected into the next call of an operation
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Transient,
    Conflict,
    /// Another writer created the object first
    AlreadyExists,
    /// Another writer removed the object first
    NotFound,
}

pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    version: AtomicU64,
    calls: Mutex<HashMap<StoreOp, usize>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<Failure>>>,
    reverse_listing: AtomicBool,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            reverse_listing: AtomicBool::new(false),
        }
    }
}

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {}", reason),
        reason: reason.to_string(),
        code,
    })
}

fn key_of<K: StoredResource>(obj: &K) -> (String, String) {
    (
        obj.namespace().unwrap_or_else(|| NAMESPACE.to_string()),
        obj.name_any(),
    )
}

impl<K: StoredResource> MemoryStore<K> {
    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn error(name: &str, code: u16, reason: &str) -> Error {
        Error::from_kube(&K::kind(&()), name, api_error(code, reason))
    }

    fn enter(&self, op: StoreOp, name: &str) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front());
        match injected {
            Some(Failure::Transient) => Err(Self::error(name, 503, "ServiceUnavailable")),
            Some(Failure::Conflict) => Err(Self::error(name, 409, "Conflict")),
            Some(Failure::AlreadyExists) => Err(Self::error(name, 409, "AlreadyExists")),
            Some(Failure::NotFound) => Err(Self::error(name, 404, "NotFound")),
            None => Ok(()),
        }
    }

    /// Insert an object directly, as if a user had applied it
    pub fn seed(&self, mut obj: K) -> K {
        let (namespace, name) = key_of(&obj);
        let version = self.next_version();
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.clone());
        meta.uid = Some(format!("uid-{}-{}", name, version));
        meta.resource_version = Some(version);
        meta.creation_timestamp = Some(Time(Utc::now()));
        self.objects
            .lock()
            .unwrap()
            .insert((namespace, name), obj.clone());
        obj
    }

    /// Overwrite an object as a user edit would, keeping its identity
    pub fn edit(&self, name: &str, change: impl FnOnce(&mut K)) -> K {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(NAMESPACE.to_string(), name.to_string()))
            .expect("object to edit");
        change(obj);
        obj.meta_mut().resource_version = Some(self.next_version());
        obj.clone()
    }

    /// Bump the resource version, simulating a concurrent writer
    pub fn touch(&self, name: &str) {
        self.edit(name, |_| {});
    }

    /// Deletion request from a user
    pub fn request_deletion(&self, name: &str) {
        self.mark_deleted(&(NAMESPACE.to_string(), name.to_string()));
    }

    fn mark_deleted(&self, key: &(String, String)) {
        let mut objects = self.objects.lock().unwrap();
        let guarded = match objects.get(key) {
            Some(obj) => !obj.finalizers().is_empty(),
            None => return,
        };
        if !guarded {
            objects.remove(key);
            return;
        }
        if let Some(obj) = objects.get_mut(key) {
            if obj.meta().deletion_timestamp.is_none() {
                obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
                obj.meta_mut().resource_version = Some(self.next_version());
            }
        }
    }

    /// Drop an object outright, as a concurrent deleter would
    pub fn remove(&self, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(NAMESPACE.to_string(), name.to_string()));
    }

    pub fn fetch(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Every write issued so far
    pub fn mutations(&self) -> usize {
        [
            StoreOp::Create,
            StoreOp::Update,
            StoreOp::UpdateStatus,
            StoreOp::Delete,
        ]
        .iter()
        .map(|op| self.calls(*op))
        .sum()
    }

    pub fn fail_next(&self, op: StoreOp, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(failure);
    }

    /// List in reverse name order instead of the API server's name order
    pub fn reverse_listing(&self) {
        self.reverse_listing.store(true, Ordering::SeqCst);
    }

    fn check_version(&self, stored: &K, incoming: &K, name: &str) -> Result<()> {
        match incoming.resource_version() {
            Some(version) if Some(&version) != stored.resource_version().as_ref() => {
                Err(Self::error(name, 409, "Conflict"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K: StoredResource> ResourceAccessor<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.enter(StoreOp::Get, name)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<K>> {
        self.enter(StoreOp::List, label_value)?;
        let mut items: Vec<K> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), obj)| {
                ns == namespace
                    && obj.labels().get(label_key).map(String::as_str) == Some(label_value)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        if self.reverse_listing.load(Ordering::SeqCst) {
            items.reverse();
        }
        Ok(items)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        self.enter(StoreOp::List, namespace)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = key_of(obj);
        self.enter(StoreOp::Create, &name)?;
        if self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(namespace.clone(), name.clone()))
        {
            return Err(Self::error(&name, 409, "AlreadyExists"));
        }
        Ok(self.seed(obj.clone()))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        self.enter(StoreOp::Update, &key.1)?;
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(Self::error(&key.1, 404, "NotFound"));
        };
        self.check_version(stored, obj, &key.1)?;

        let mut updated = obj.clone();
        updated.meta_mut().uid = stored.uid();
        updated.meta_mut().creation_timestamp = stored.meta().creation_timestamp.clone();
        updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        updated.meta_mut().resource_version = Some(self.next_version());

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        self.enter(StoreOp::UpdateStatus, &key.1)?;
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(Self::error(&key.1, 404, "NotFound"));
        };
        self.check_version(stored, obj, &key.1)?;

        let mut updated = obj.clone();
        *updated.meta_mut() = stored.meta().clone();
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        let key = key_of(obj);
        self.enter(StoreOp::Delete, &key.1)?;
        let stored = self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::error(&key.1, 404, "NotFound"))?;
        self.check_version(&stored, obj, &key.1)?;
        self.mark_deleted(&key);
        Ok(())
    }
}

pub fn route(name: &str, router: &str, path_prefix: &str) -> ConsulServiceRoute {
    let mut obj = ConsulServiceRoute::new(
        name,
        ConsulServiceRouteSpec {
            route: ServiceRoute::path_prefix(name, path_prefix),
        },
    );
    obj.metadata.namespace = Some(NAMESPACE.to_string());
    if !router.is_empty() {
        obj.labels_mut()
            .insert(SERVICE_ROUTER_LABEL.to_string(), router.to_string());
    }
    obj
}

pub fn source(name: &str, destination: &str, caller: &str) -> ConsulServiceIntentionsSource {
    let mut obj = ConsulServiceIntentionsSource::new(
        name,
        ConsulServiceIntentionsSourceSpec {
            source: SourceIntention::allow(caller),
        },
    );
    obj.metadata.namespace = Some(NAMESPACE.to_string());
    obj.labels_mut()
        .insert(SERVICE_INTENTIONS_LABEL.to_string(), destination.to_string());
    obj
}

/// Fragment and composite stores wired to a reconciler
pub struct Harness<F: FragmentResource> {
    pub fragments: Arc<MemoryStore<F>>,
    pub composites: Arc<MemoryStore<F::Composite>>,
    pub reconciler: FragmentReconciler<F>,
}

impl<F: FragmentResource> Harness<F> {
    fn with_merger(
        fragments: Arc<MemoryStore<F>>,
        composites: Arc<MemoryStore<F::Composite>>,
        merger: Merger<F::Composite>,
    ) -> Self {
        let accessor: Arc<dyn ResourceAccessor<F>> = fragments.clone();
        Self {
            reconciler: FragmentReconciler::new(accessor, merger),
            fragments,
            composites,
        }
    }
}

pub fn route_harness() -> Harness<ConsulServiceRoute> {
    let fragments: Arc<MemoryStore<ConsulServiceRoute>> = Arc::new(MemoryStore::default());
    let composites: Arc<MemoryStore<ServiceRouter>> = Arc::new(MemoryStore::default());
    let accessor: Arc<dyn ResourceAccessor<ServiceRouter>> = composites.clone();
    Harness::with_merger(fragments, composites, Merger::new(accessor))
}

pub fn intentions_harness() -> Harness<ConsulServiceIntentionsSource> {
    let fragments: Arc<MemoryStore<ConsulServiceIntentionsSource>> =
        Arc::new(MemoryStore::default());
    let composites: Arc<MemoryStore<ServiceIntentions>> = Arc::new(MemoryStore::default());
    let accessor: Arc<dyn ResourceAccessor<ServiceIntentions>> = composites.clone();
    let merger = Merger::new(accessor).with_patch(stamp_destination);
    Harness::with_merger(fragments, composites, merger)
}
