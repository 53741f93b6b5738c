//! Store access for fragments and composites
//!
//! [`ResourceAccessor`] is the only way the merge engine and the reconciler
//! reach external state. Every call is a round trip; nothing is cached here.
//! Errors leave this layer already classified (see [`Error::from_kube`]).

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Client, Resource, ResourceExt};
use tracing::debug;

use crate::crd::StoredResource;
use crate::error::{Error, Result};

/// Generic CRUD over one resource type
#[async_trait]
pub trait ResourceAccessor<K: StoredResource>: Send + Sync {
    /// Fetch by identity; `None` when the object does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Every object in `namespace` whose `label_key` equals `label_value`,
    /// including objects already marked for deletion
    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<K>>;

    /// Every object in `namespace`
    async fn list(&self, namespace: &str) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace the object; the carried resource version guards the write
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource under the same version guard
    async fn update_status(&self, obj: &K) -> Result<K>;

    async fn delete(&self, obj: &K) -> Result<()>;
}

/// [`ResourceAccessor`] backed by the Kubernetes API server
pub struct KubeAccessor<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeAccessor<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeAccessor<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K: StoredResource> KubeAccessor<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn classify(name: &str, err: kube::Error) -> Error {
        Error::from_kube(&K::kind(&()), name, err)
    }
}

fn namespace_of<K: StoredResource>(obj: &K) -> String {
    obj.namespace().unwrap_or_else(|| "default".to_string())
}

#[async_trait]
impl<K: StoredResource> ResourceAccessor<K> for KubeAccessor<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<K>> {
        let selector = format!("{}={}", label_key, label_value);
        debug!("Listing {} in {} with {}", K::kind(&()), namespace, selector);

        let list = self
            .api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| Self::classify(label_value, e))?;
        Ok(list.items)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Self::classify(namespace, e))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api(&namespace_of(obj))
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify(&name, e))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api(&namespace_of(obj))
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify(&name, e))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let body = serde_json::to_vec(obj)?;
        self.api(&namespace_of(obj))
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| Self::classify(&name, e))
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        let name = obj.name_any();
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: obj.resource_version(),
                uid: obj.uid(),
            }),
            ..DeleteParams::default()
        };

        self.api(&namespace_of(obj))
            .delete(&name, &params)
            .await
            .map(|_| ())
            .map_err(|e| Self::classify(&name, e))
    }
}

/// Whether deletion of `obj` has been requested
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
