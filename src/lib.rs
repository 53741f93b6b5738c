//! consul-merge-k8s: Kubernetes operator assembling Consul config entries
//!
//! Teams publish small fragment resources (one route, one intention source)
//! labelled with the name of the Consul config entry they belong to. The
//! operator folds every fragment sharing a label into one `ServiceRouter` or
//! `ServiceIntentions` and keeps it in sync as fragments come and go.

pub mod controller;
pub mod crd;
pub mod error;
pub mod leader;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
