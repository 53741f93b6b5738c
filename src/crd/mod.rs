//! Custom Resource Definitions for the merge operator
//!
//! Fragment CRDs (`ConsulServiceRoute`, `ConsulServiceIntentionsSource`) are
//! owned by this operator; the Consul composites they merge into are
//! modelled in [`consul`].

pub mod consul;
pub mod intentions;
pub mod route;
mod status;
pub mod traits;


pub use consul::{
    HeaderMatch, IntentionAction, IntentionDestination, IntentionHttpPermission,
    IntentionPermission, QueryParamMatch, ServiceIntentions, ServiceIntentionsSpec, ServiceRoute,
    ServiceRouteDestination, ServiceRouteHttpMatch, ServiceRouteMatch, ServiceRouter,
    ServiceRouterSpec, SourceIntention,
};
pub use intentions::{
    stamp_destination, ConsulServiceIntentionsSource, ConsulServiceIntentionsSourceSpec,
};
pub use route::{ConsulServiceRoute, ConsulServiceRouteSpec};
pub use status::FragmentStatus;
pub use traits::{CompositeResource, FragmentResource, StoredResource};

/// API group of the fragment CRDs
pub const SERVICE_GROUP: &str = "service.consul.k8s.nativechat.com";

/// Label naming the `ServiceRouter` a route belongs to
pub const SERVICE_ROUTER_LABEL: &str = "service.consul.k8s.nativechat.com/service-router";

/// Label naming the `ServiceIntentions` a source belongs to
pub const SERVICE_INTENTIONS_LABEL: &str = "service.consul.k8s.nativechat.com/service-intentions";

/// Finalizer placed on every fragment until its removal has been merged
pub const FRAGMENT_FINALIZER: &str = "finalizer.service.consul.k8s.nativechat.com";
