//! ConsulServiceRoute Custom Resource Definition
//!
//! A ConsulServiceRoute carries one route. Every route labelled with the same
//! service-router name is merged into a single Consul `ServiceRouter`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::consul::{ServiceRoute, ServiceRouter, ServiceRouterSpec};
use super::status::FragmentStatus;
use super::traits::{CompositeResource, FragmentResource};
use super::{FRAGMENT_FINALIZER, SERVICE_ROUTER_LABEL};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "service.consul.k8s.nativechat.com",
    version = "v1alpha1",
    kind = "ConsulServiceRoute",
    namespaced,
    status = "FragmentStatus",
    shortname = "csr",
    printcolumn = r#"{"name":"Router","type":"string","jsonPath":".metadata.labels.service\\.consul\\.k8s\\.nativechat\\.com/service-router"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.lastSyncedAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConsulServiceRouteSpec {
    pub route: ServiceRoute,
}

impl FragmentResource for ConsulServiceRoute {
    type Spec = ConsulServiceRouteSpec;
    type Composite = ServiceRouter;

    const KEY_LABEL: &'static str = SERVICE_ROUTER_LABEL;
    const FINALIZER: &'static str = FRAGMENT_FINALIZER;

    fn spec_value(&self) -> &ConsulServiceRouteSpec {
        &self.spec
    }

    fn merge_item(&self) -> ServiceRoute {
        self.spec.route.clone()
    }

    fn fragment_status(&self) -> Option<&FragmentStatus> {
        self.status.as_ref()
    }

    fn set_fragment_status(&mut self, status: FragmentStatus) {
        self.status = Some(status);
    }
}

impl CompositeResource for ServiceRouter {
    type Spec = ServiceRouterSpec;
    type Item = ServiceRoute;

    fn build(key: &str, namespace: &str, items: Vec<ServiceRoute>) -> Self {
        let mut router = ServiceRouter::new(key, ServiceRouterSpec { routes: items });
        router.metadata.namespace = Some(namespace.to_string());
        router
    }

    fn spec_value(&self) -> &ServiceRouterSpec {
        &self.spec
    }

    fn set_spec_value(&mut self, spec: ServiceRouterSpec) {
        self.spec = spec;
    }

    fn merge_items(&self) -> &[ServiceRoute] {
        &self.spec.routes
    }
}
