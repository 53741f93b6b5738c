//! Finalizer handling for fragments
//!
//! The finalizer keeps a deleted fragment visible until the reconciler has
//! merged its absence into the composite:
//! 1. A live fragment without the token gets it added
//! 2. A deleting fragment carrying the token gets it removed, letting the
//!    API server finish the deletion
//! 3. Anything else is left untouched

use kube::ResourceExt;
use tracing::info;

use super::accessor::{is_being_deleted, ResourceAccessor};
use crate::crd::StoredResource;
use crate::error::Result;

/// Check if the object carries `token`
pub fn has_finalizer<K: ResourceExt>(obj: &K, token: &str) -> bool {
    obj.finalizers().iter().any(|f| f == token)
}

/// Bring the finalizer on `obj` in line with its deletion state
///
/// Persists at most once. On a write, `obj` is replaced by the object the
/// store returned so later writes carry the fresh resource version. Returns
/// whether anything was written.
pub async fn reconcile_finalizer<K: StoredResource>(
    accessor: &dyn ResourceAccessor<K>,
    obj: &mut K,
    token: &str,
) -> Result<bool> {
    let present = has_finalizer(obj, token);

    if is_being_deleted(obj) {
        if !present {
            return Ok(false);
        }
        info!("Removing finalizer from {} {}", K::kind(&()), obj.name_any());
        obj.finalizers_mut().retain(|f| f != token);
        *obj = accessor.update(obj).await?;
        info!("Finalizer removed from {} {}", K::kind(&()), obj.name_any());
        return Ok(true);
    }

    if present {
        return Ok(false);
    }

    info!("Adding finalizer to {} {}", K::kind(&()), obj.name_any());
    obj.finalizers_mut().push(token.to_string());
    *obj = accessor.update(obj).await?;
    info!("Finalizer added to {} {}", K::kind(&()), obj.name_any());
    Ok(true)
}
