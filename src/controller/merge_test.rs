//! Tests for the merge engine
//!
//! These tests drive `Merger` against the in-memory store and check the
//! outcome table: create, no-op, update, delete and ordering.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kube::ResourceExt;

    use super::super::accessor::ResourceAccessor;
    use super::super::merge::*;
    use super::super::testing::{route, source, Failure, MemoryStore, StoreOp, NAMESPACE};
    use crate::crd::{
        stamp_destination, ConsulServiceIntentionsSource, ConsulServiceRoute, ServiceIntentions,
        ServiceRoute, ServiceRouter,
    };

    struct Fixture {
        fragments: MemoryStore<ConsulServiceRoute>,
        routers: Arc<MemoryStore<ServiceRouter>>,
        merger: Merger<ServiceRouter>,
    }

    fn fixture() -> Fixture {
        let routers: Arc<MemoryStore<ServiceRouter>> = Arc::new(MemoryStore::default());
        let accessor: Arc<dyn ResourceAccessor<ServiceRouter>> = routers.clone();
        Fixture {
            fragments: MemoryStore::default(),
            routers,
            merger: Merger::new(accessor),
        }
    }

    fn prefixes(router: &ServiceRouter) -> Vec<String> {
        router
            .spec
            .routes
            .iter()
            .filter_map(|r| r.match_.as_ref()?.http.as_ref()?.path_prefix.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_creates_composite_from_fragments() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        let b = f.fragments.seed(route("route-b", "svc-a", "/b"));

        let outcome = f.merger.merge("svc-a", NAMESPACE, &[a, b]).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Created);
        let router = f.routers.fetch("svc-a").unwrap();
        assert_eq!(prefixes(&router), vec!["/a", "/b"]);

        let owners: Vec<_> = router
            .owner_references()
            .iter()
            .map(|o| (o.kind.clone(), o.name.clone()))
            .collect();
        assert_eq!(
            owners,
            vec![
                ("ConsulServiceRoute".to_string(), "route-a".to_string()),
                ("ConsulServiceRoute".to_string(), "route-b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_merge_is_noop() {
        let f = fixture();
        let fragments = vec![
            f.fragments.seed(route("route-a", "svc-a", "/a")),
            f.fragments.seed(route("route-b", "svc-a", "/b")),
        ];

        f.merger.merge("svc-a", NAMESPACE, &fragments).await.unwrap();
        let outcome = f.merger.merge("svc-a", NAMESPACE, &fragments).await.unwrap();

        assert_eq!(outcome, MergeOutcome::NoOp);
        assert_eq!(f.routers.calls(StoreOp::Create), 1);
        assert_eq!(f.routers.calls(StoreOp::Update), 0);
    }

    #[tokio::test]
    async fn test_updates_composite_when_a_fragment_changes() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        let b = f.fragments.seed(route("route-b", "svc-a", "/b"));
        f.merger
            .merge("svc-a", NAMESPACE, &[a.clone(), b])
            .await
            .unwrap();

        let b = f.fragments.edit("route-b", |obj| {
            obj.spec.route = ServiceRoute::path_prefix("route-b", "/b/v2");
        });
        let outcome = f.merger.merge("svc-a", NAMESPACE, &[a, b]).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(prefixes(&f.routers.fetch("svc-a").unwrap()), vec!["/a", "/b/v2"]);
    }

    #[tokio::test]
    async fn test_restores_drifted_composite() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        f.merger
            .merge("svc-a", NAMESPACE, std::slice::from_ref(&a))
            .await
            .unwrap();

        f.routers.edit("svc-a", |router| router.spec.routes.clear());
        let outcome = f.merger.merge("svc-a", NAMESPACE, &[a]).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(prefixes(&f.routers.fetch("svc-a").unwrap()), vec!["/a"]);
    }

    #[tokio::test]
    async fn test_recreated_fragment_refreshes_owner_reference() {
        let f = fixture();
        let first = f.fragments.seed(route("route-a", "svc-a", "/a"));
        f.merger.merge("svc-a", NAMESPACE, &[first]).await.unwrap();

        // same spec, new identity
        let second = f.fragments.seed(route("route-a", "svc-a", "/a"));
        let outcome = f
            .merger
            .merge("svc-a", NAMESPACE, std::slice::from_ref(&second))
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Updated);
        let router = f.routers.fetch("svc-a").unwrap();
        assert_eq!(router.owner_references()[0].uid, second.uid().unwrap());
    }

    #[tokio::test]
    async fn test_deletes_composite_without_fragments() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        f.merger.merge("svc-a", NAMESPACE, &[a]).await.unwrap();

        let outcome = f
            .merger
            .merge::<ConsulServiceRoute>("svc-a", NAMESPACE, &[])
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Deleted);
        assert!(f.routers.fetch("svc-a").is_none());
    }

    #[tokio::test]
    async fn test_nothing_to_do_without_composite_or_fragments() {
        let f = fixture();

        let outcome = f
            .merger
            .merge::<ConsulServiceRoute>("svc-a", NAMESPACE, &[])
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::NoOp);
        assert_eq!(f.routers.mutations(), 0);
        assert_eq!(f.routers.len(), 0);
    }

    #[tokio::test]
    async fn test_item_order_ignores_listing_order() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        let b = f.fragments.seed(route("route-b", "svc-a", "/b"));
        let c = f.fragments.seed(route("route-c", "svc-a", "/c"));

        let forward = f
            .merger
            .expected("svc-a", NAMESPACE, &[a.clone(), b.clone(), c.clone()]);
        let shuffled = f.merger.expected("svc-a", NAMESPACE, &[c, a, b]);

        assert_eq!(forward.spec, shuffled.spec);
        assert_eq!(forward.owner_references(), shuffled.owner_references());
        assert_eq!(prefixes(&shuffled), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn test_patch_stamps_intentions_destination() {
        let composites: Arc<MemoryStore<ServiceIntentions>> = Arc::new(MemoryStore::default());
        let accessor: Arc<dyn ResourceAccessor<ServiceIntentions>> = composites.clone();
        let merger = Merger::new(accessor).with_patch(stamp_destination);
        let fragments: MemoryStore<ConsulServiceIntentionsSource> = MemoryStore::default();
        let web = fragments.seed(source("web", "svc-b", "web"));

        let outcome = merger.merge("svc-b", NAMESPACE, &[web]).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Created);
        let intentions = composites.fetch("svc-b").unwrap();
        assert_eq!(intentions.spec.destination.name, "svc-b");
        assert_eq!(intentions.spec.sources.len(), 1);
        assert_eq!(intentions.spec.sources[0].name, "web");
    }

    #[tokio::test]
    async fn test_store_failure_is_returned_unchanged() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        f.routers.fail_next(StoreOp::Get, Failure::Transient);

        let err = f.merger.merge("svc-a", NAMESPACE, &[a]).await.unwrap_err();

        assert!(err.is_retriable());
        assert_eq!(f.routers.mutations(), 0);
    }

    #[tokio::test]
    async fn test_stale_update_surfaces_conflict() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        f.merger
            .merge("svc-a", NAMESPACE, std::slice::from_ref(&a))
            .await
            .unwrap();
        let b = f.fragments.seed(route("route-b", "svc-a", "/b"));
        f.routers.fail_next(StoreOp::Update, Failure::Conflict);

        let err = f.merger.merge("svc-a", NAMESPACE, &[a, b]).await.unwrap_err();

        assert!(matches!(err, crate::Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_stale_keys_finds_other_composites_owned_by_fragment() {
        let f = fixture();
        let a = f.fragments.seed(route("route-a", "svc-a", "/a"));
        let b = f.fragments.seed(route("route-b", "svc-b", "/b"));
        f.merger.merge("svc-a", NAMESPACE, &[a.clone()]).await.unwrap();
        f.merger.merge("svc-b", NAMESPACE, &[b]).await.unwrap();
        f.merger.merge("svc-c", NAMESPACE, &[a.clone()]).await.unwrap();

        let uid = a.uid().unwrap();
        let stale = f.merger.stale_keys(NAMESPACE, &uid, "svc-c").await.unwrap();

        assert_eq!(stale, vec!["svc-a"]);
        assert_eq!(f.routers.calls(StoreOp::List), 1);
    }
}
