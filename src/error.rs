//! Error types for the application operator

use std::time::Duration;

use thiserror::Error;

/// Requeue delay after the cluster capability check fails
pub const PREREQUISITE_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue delay for every other reconcile error
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Main error type for application operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A write lost an optimistic-concurrency race (HTTP 409 on update)
    #[error("conflict writing {kind} {name}")]
    Conflict {
        /// Resource kind being written
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// A create found the object already present (HTTP 409 on create)
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind being created
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// The cluster does not meet the operator's install requirements
    #[error("prerequisites not fulfilled: {0}")]
    PrerequisitesNotMet(String),

    /// The referenced database still exists while the application is being deleted
    #[error("database {namespace}/{name} not deleted yet")]
    DatabaseNotDeleted {
        /// Database name
        name: String,
        /// Database namespace
        namespace: String,
    },

    /// Cluster capability discovery failed
    #[error("capability discovery error: {0}")]
    Capabilities(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The Application object is malformed (e.g. no namespace)
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a prerequisite error with the given message
    pub fn prerequisites(msg: impl Into<String>) -> Self {
        Self::PrerequisitesNotMet(msg.into())
    }

    /// Create a capability discovery error with the given message
    pub fn capabilities(msg: impl Into<String>) -> Self {
        Self::Capabilities(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Delay before the controller retries after this error
    ///
    /// Every error is retryable; only the cadence differs.
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::PrerequisitesNotMet(_) => PREREQUISITE_REQUEUE,
            _ => DEFAULT_ERROR_REQUEUE,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Returns true if the kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the kube error is an API 409
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use rstest::rstest;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    /// Story: the capability check failing retries on a fixed slow cadence,
    /// everything else falls back to the default backoff.
    #[rstest]
    #[case::prerequisites(Error::prerequisites("server version unavailable"), PREREQUISITE_REQUEUE)]
    #[case::pending_deletion(
        Error::DatabaseNotDeleted { name: "shopdb".into(), namespace: "default".into() },
        DEFAULT_ERROR_REQUEUE
    )]
    #[case::conflict(Error::Conflict { kind: "Deployment", name: "shop".into() }, DEFAULT_ERROR_REQUEUE)]
    #[case::serialization(Error::serialization("bad"), DEFAULT_ERROR_REQUEUE)]
    fn requeue_cadence_depends_on_error_kind(#[case] err: Error, #[case] expected: Duration) {
        assert_eq!(err.requeue_after(), expected);
    }

    #[test]
    fn pending_deletion_message_names_the_database() {
        let err = Error::DatabaseNotDeleted {
            name: "shopdb".to_string(),
            namespace: "default".to_string(),
        };
        assert_eq!(err.to_string(), "database default/shopdb not deleted yet");
    }

    #[test]
    fn status_code_helpers_classify_api_errors() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(500)));
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
