//! Capability traits binding a fragment kind to its composite kind
//!
//! The merge engine and the reconciler are generic over these traits; each
//! fragment/composite pair is wired together at compile time instead of
//! being discovered through runtime introspection.

use std::fmt::Debug;

use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::status::FragmentStatus;

/// Bounds every resource handled by the accessor layer
pub trait StoredResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A small resource contributing exactly one item to a composite
pub trait FragmentResource: StoredResource {
    /// Mutable payload hashed for change detection
    type Spec: Serialize;

    /// Composite this fragment is folded into
    type Composite: CompositeResource;

    /// Label whose value names the composite
    const KEY_LABEL: &'static str;

    /// Finalizer token guarding physical deletion
    const FINALIZER: &'static str;

    fn spec_value(&self) -> &Self::Spec;

    /// The single item this fragment contributes
    fn merge_item(&self) -> <Self::Composite as CompositeResource>::Item;

    fn fragment_status(&self) -> Option<&FragmentStatus>;

    fn set_fragment_status(&mut self, status: FragmentStatus);
}

/// The aggregate assembled from every fragment sharing a key
pub trait CompositeResource: StoredResource {
    type Spec: PartialEq + Clone + Debug + Send + Sync;
    type Item: Clone + Debug + Send + Sync;

    /// Fresh composite named `key` holding `items` in the given order
    fn build(key: &str, namespace: &str, items: Vec<Self::Item>) -> Self;

    fn spec_value(&self) -> &Self::Spec;

    fn set_spec_value(&mut self, spec: Self::Spec);

    fn merge_items(&self) -> &[Self::Item];
}
