//! ConsulServiceIntentionsSource Custom Resource Definition
//!
//! Each source names one caller of a destination service. Sources sharing a
//! service-intentions label are merged into a Consul `ServiceIntentions`
//! whose destination is the label value.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::consul::{
    IntentionDestination, ServiceIntentions, ServiceIntentionsSpec, SourceIntention,
};
use super::status::FragmentStatus;
use super::traits::{CompositeResource, FragmentResource};
use super::{FRAGMENT_FINALIZER, SERVICE_INTENTIONS_LABEL};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "service.consul.k8s.nativechat.com",
    version = "v1alpha1",
    kind = "ConsulServiceIntentionsSource",
    namespaced,
    status = "FragmentStatus",
    shortname = "csis",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.source.name"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.lastSyncedAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConsulServiceIntentionsSourceSpec {
    pub source: SourceIntention,
}

impl FragmentResource for ConsulServiceIntentionsSource {
    type Spec = ConsulServiceIntentionsSourceSpec;
    type Composite = ServiceIntentions;

    const KEY_LABEL: &'static str = SERVICE_INTENTIONS_LABEL;
    const FINALIZER: &'static str = FRAGMENT_FINALIZER;

    fn spec_value(&self) -> &ConsulServiceIntentionsSourceSpec {
        &self.spec
    }

    fn merge_item(&self) -> SourceIntention {
        self.spec.source.clone()
    }

    fn fragment_status(&self) -> Option<&FragmentStatus> {
        self.status.as_ref()
    }

    fn set_fragment_status(&mut self, status: FragmentStatus) {
        self.status = Some(status);
    }
}

impl CompositeResource for ServiceIntentions {
    type Spec = ServiceIntentionsSpec;
    type Item = SourceIntention;

    fn build(key: &str, namespace: &str, items: Vec<SourceIntention>) -> Self {
        let mut intentions = ServiceIntentions::new(
            key,
            ServiceIntentionsSpec {
                destination: IntentionDestination::default(),
                sources: items,
            },
        );
        intentions.metadata.namespace = Some(namespace.to_string());
        intentions
    }

    fn spec_value(&self) -> &ServiceIntentionsSpec {
        &self.spec
    }

    fn set_spec_value(&mut self, spec: ServiceIntentionsSpec) {
        self.spec = spec;
    }

    fn merge_items(&self) -> &[SourceIntention] {
        &self.spec.sources
    }
}

/// Points the expected intentions at the service they are named after
pub fn stamp_destination(intentions: &mut ServiceIntentions) {
    intentions.spec.destination.name = intentions.name_any();
}
