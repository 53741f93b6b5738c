//! Consul config entry resources written by the operator
//!
//! `ServiceRouter` and `ServiceIntentions` are owned by consul-k8s; only the
//! fields the operator merges are modelled here. Item types are shared with
//! the fragment CRDs so a fragment payload lands in the composite verbatim.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Header match shared by routes and intention permissions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    pub name: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub present: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invert: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryParamMatch {
    pub name: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub present: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// L7 match criteria of a single route
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouteHttpMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_exact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<HeaderMatch>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_param: Vec<QueryParamMatch>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouteMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<ServiceRouteHttpMatch>,
}

/// Where matching traffic is sent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouteDestination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_subset: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,

    /// Duration string, e.g. `15s`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retry_on_connect_failure: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on_status_codes: Vec<u32>,
}

/// One route of a `ServiceRouter`, and the payload of a `ConsulServiceRoute`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoute {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<ServiceRouteMatch>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<ServiceRouteDestination>,
}

impl ServiceRoute {
    /// Route sending every request under `path_prefix` to `service`
    pub fn path_prefix(service: &str, path_prefix: &str) -> Self {
        Self {
            match_: Some(ServiceRouteMatch {
                http: Some(ServiceRouteHttpMatch {
                    path_prefix: Some(path_prefix.to_string()),
                    ..Default::default()
                }),
            }),
            destination: Some(ServiceRouteDestination {
                service: Some(service.to_string()),
                ..Default::default()
            }),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "consul.hashicorp.com",
    version = "v1alpha1",
    kind = "ServiceRouter",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouterSpec {
    #[serde(default)]
    pub routes: Vec<ServiceRoute>,
}

/// Intention action
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntentionAction {
    Allow,
    Deny,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentionHttpPermission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_exact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<HeaderMatch>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentionPermission {
    pub action: IntentionAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<IntentionHttpPermission>,
}

/// One caller allowed or denied by a `ServiceIntentions` entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceIntention {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// L4 action; mutually exclusive with `permissions`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<IntentionAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<IntentionPermission>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SourceIntention {
    pub fn allow(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: Some(IntentionAction::Allow),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentionDestination {
    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "consul.hashicorp.com",
    version = "v1alpha1",
    kind = "ServiceIntentions",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIntentionsSpec {
    #[serde(default)]
    pub destination: IntentionDestination,

    #[serde(default)]
    pub sources: Vec<SourceIntention>,
}
