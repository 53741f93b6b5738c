//! Merge engine
//!
//! Folds a set of fragments into the composite named by their aggregation
//! key. The engine is the only writer of composites and performs at most one
//! composite mutation per call:
//!
//! | live composite | expected items | result    |
//! |----------------|----------------|-----------|
//! | absent         | empty          | `NoOp`    |
//! | absent         | non-empty      | `Created` |
//! | present        | empty          | `Deleted` |
//! | present, equal | non-empty      | `NoOp`    |
//! | present, stale | non-empty      | `Updated` |

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::accessor::ResourceAccessor;
use crate::crd::{CompositeResource, FragmentResource};
use crate::error::Result;

/// Adjusts the expected composite before it is compared with the live one
pub type PatchFn<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// What a merge did to the composite
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    Deleted,
    NoOp,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Created => "created",
            MergeOutcome::Updated => "updated",
            MergeOutcome::Deleted => "deleted",
            MergeOutcome::NoOp => "noop",
        }
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merge engine for one composite kind
pub struct Merger<C: CompositeResource> {
    composites: Arc<dyn ResourceAccessor<C>>,
    patch: Option<PatchFn<C>>,
}

impl<C: CompositeResource> Clone for Merger<C> {
    fn clone(&self) -> Self {
        Self {
            composites: Arc::clone(&self.composites),
            patch: self.patch.clone(),
        }
    }
}

impl<C: CompositeResource> Merger<C> {
    pub fn new(composites: Arc<dyn ResourceAccessor<C>>) -> Self {
        Self {
            composites,
            patch: None,
        }
    }

    /// Install a hook stamping derived fields on the expected composite
    pub fn with_patch(mut self, patch: impl Fn(&mut C) + Send + Sync + 'static) -> Self {
        self.patch = Some(Arc::new(patch));
        self
    }

    /// Composite the given fragments should produce
    ///
    /// Fragments are ordered by name so the item and owner-reference order
    /// does not depend on the listing order.
    pub fn expected<F>(&self, key: &str, namespace: &str, fragments: &[F]) -> C
    where
        F: FragmentResource<Composite = C>,
    {
        let mut ordered: Vec<&F> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.name_any());

        let items = ordered.iter().map(|f| f.merge_item()).collect();
        let mut expected = C::build(key, namespace, items);
        *expected.owner_references_mut() = ordered.iter().filter_map(|f| owner_ref(*f)).collect();

        if let Some(patch) = &self.patch {
            patch(&mut expected);
        }
        expected
    }

    /// Names of composites other than `key` still listing `owner_uid` as an owner
    pub async fn stale_keys(
        &self,
        namespace: &str,
        owner_uid: &str,
        key: &str,
    ) -> Result<Vec<String>> {
        let composites = self.composites.list(namespace).await?;
        Ok(composites
            .iter()
            .filter(|c| c.name_any() != key)
            .filter(|c| c.owner_references().iter().any(|o| o.uid == owner_uid))
            .map(|c| c.name_any())
            .collect())
    }

    /// Reconcile the composite `key` in `namespace` against `fragments`
    #[instrument(skip(self, fragments), fields(kind = %C::kind(&()), fragments = fragments.len()))]
    pub async fn merge<F>(
        &self,
        key: &str,
        namespace: &str,
        fragments: &[F],
    ) -> Result<MergeOutcome>
    where
        F: FragmentResource<Composite = C>,
    {
        let kind = C::kind(&());
        let expected = self.expected(key, namespace, fragments);
        let wants_items = !expected.merge_items().is_empty();

        let Some(mut actual) = self.composites.get(namespace, key).await? else {
            if !wants_items {
                debug!("No {} {}/{} and nothing to merge", kind, namespace, key);
                return Ok(MergeOutcome::NoOp);
            }
            info!("Creating {} {}/{}", kind, namespace, key);
            self.composites.create(&expected).await?;
            info!("{} {}/{} created", kind, namespace, key);
            return Ok(MergeOutcome::Created);
        };

        if !wants_items {
            info!(
                "No items left for {} {}/{}, it will be deleted",
                kind, namespace, key
            );
            self.composites.delete(&actual).await?;
            info!("{} {}/{} deleted", kind, namespace, key);
            return Ok(MergeOutcome::Deleted);
        }

        if expected.spec_value() == actual.spec_value()
            && expected.owner_references() == actual.owner_references()
        {
            debug!("{} {}/{} is up to date", kind, namespace, key);
            return Ok(MergeOutcome::NoOp);
        }

        info!("Updating {} {}/{}", kind, namespace, key);
        actual.set_spec_value(expected.spec_value().clone());
        *actual.owner_references_mut() = expected.owner_references().to_vec();
        self.composites.update(&actual).await?;
        info!("{} {}/{} updated", kind, namespace, key);
        Ok(MergeOutcome::Updated)
    }
}

/// Back-link from the composite to a contributing fragment
fn owner_ref<F: Resource<DynamicType = ()>>(fragment: &F) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: F::api_version(&()).to_string(),
        kind: F::kind(&()).to_string(),
        name: fragment.meta().name.clone()?,
        uid: fragment.meta().uid.clone()?,
        ..OwnerReference::default()
    })
}
