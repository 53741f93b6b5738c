//! Error types for the merge operator
//!
//! Every store error is classified into this taxonomy before it leaves the
//! accessor layer, so the reconciler and the controller error policy only
//! ever look at [`Error`] variants, never at raw HTTP status codes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Object is absent from the store
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Create collided with an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-concurrency mismatch, the caller must re-read and retry
    #[error("Conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Store unavailable, throttled or unreachable
    #[error("Transient store error for {kind} {name}: {source}")]
    Transient {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Malformed fragment that only a human can fix
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The store rejected the object content (HTTP 400/422)
    #[error("Invalid {kind} {name}: {message}")]
    Invalid {
        kind: String,
        name: String,
        message: String,
    },

    /// Reconcile exceeded its deadline
    #[error("Reconcile of {0} timed out")]
    Timeout(String),

    /// Unclassified Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify a raw client error raised while touching `kind`/`name`.
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Error::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 if resp.reason == "AlreadyExists" => Error::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => Error::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: resp.message,
                },
                400 | 422 => Error::Invalid {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: resp.message,
                },
                code if code == 429 || code >= 500 => Error::Transient {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    source: kube::Error::Api(resp),
                },
                _ => Error::KubeError(kube::Error::Api(resp)),
            },
            kube::Error::SerdeError(e) => Error::SerializationError(e),
            kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::HttpError(_) => {
                Error::Transient {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    source: err,
                }
            }
            other => Error::KubeError(other),
        }
    }

    /// Whether the condition can clear on its own and deserves a fast retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::Transient { .. } | Error::Timeout(_)
        )
    }

    /// Whether retrying can never succeed until the object itself changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::BadRequest(_) | Error::Invalid { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Short category used in logs and metric labels
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Conflict { .. } => "conflict",
            Error::Transient { .. } => "transient",
            Error::BadRequest(_) => "bad_request",
            Error::Invalid { .. } => "invalid",
            Error::Timeout(_) => "timeout",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
        }
    }
}
