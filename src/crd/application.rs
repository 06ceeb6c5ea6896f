//! Application Custom Resource Definition
//!
//! An Application declares a microservice deployment backed by a database.
//! The operator converges it into a Database reference, a Secret, a
//! Deployment and a NodePort Service.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DatabaseRef};
use crate::Error;

/// Specification for an Application
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "application.sample.ibm.com",
    version = "v1beta1",
    kind = "Application",
    plural = "applications",
    status = "ApplicationStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicaCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Application version
    #[serde(default = "default_version")]
    pub version: String,

    /// Number of microservice pods
    #[serde(default = "default_replica_count")]
    #[schemars(range(min = 0))]
    pub replica_count: i32,

    /// Database this application uses
    #[serde(default)]
    pub database_ref: DatabaseRef,

    /// SQL script used to create the application schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_replica_count() -> i32 {
    1
}

/// Observed state of an Application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Ordered reconciliation conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Whether the application schema has been created in the database
    #[serde(default)]
    pub database_schema_created: bool,
}

impl Application {
    /// Namespace of the Application, required for every dependent resource
    pub fn namespace_or_err(&self) -> Result<String, Error> {
        self.namespace()
            .ok_or_else(|| Error::validation(format!("application {} has no namespace", self.name_any())))
    }

    /// True once the user has asked for this Application to be deleted
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Check whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == finalizer))
    }

    /// Conditions recorded so far, empty when there is no status yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn sample_application() -> Application {
        Application {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ApplicationSpec {
                version: "1.0.0".to_string(),
                replica_count: 2,
                database_ref: DatabaseRef {
                    name: "shopdb".to_string(),
                    namespace: "default".to_string(),
                },
                schema_url: None,
                title: None,
            },
            status: None,
        }
    }

    /// Story: A minimal manifest gets the documented defaults
    #[test]
    fn story_empty_spec_uses_defaults() {
        let spec: ApplicationSpec = serde_json::from_str("{}").unwrap();

        assert_eq!(spec.version, "1.0.0");
        assert_eq!(spec.replica_count, 1);
        assert_eq!(spec.database_ref.name, "database");
        assert_eq!(spec.database_ref.namespace, "database");
    }

    #[test]
    fn spec_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(&sample_application().spec).unwrap();

        assert_eq!(json["replicaCount"], 2);
        assert_eq!(json["databaseRef"]["name"], "shopdb");
        assert!(json.get("schemaUrl").is_none());
    }

    #[test]
    fn status_defaults_to_no_conditions() {
        let status: ApplicationStatus = serde_json::from_str("{}").unwrap();
        assert!(status.conditions.is_empty());
        assert!(!status.database_schema_created);
        assert!(sample_application().conditions().is_empty());
    }

    #[test]
    fn deletion_and_finalizer_helpers() {
        let mut app = sample_application();
        assert!(!app.deletion_requested());
        assert!(!app.has_finalizer("database.sample.third.party/finalizer"));

        app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        app.metadata.finalizers = Some(vec!["database.sample.third.party/finalizer".to_string()]);

        assert!(app.deletion_requested());
        assert!(app.has_finalizer("database.sample.third.party/finalizer"));
    }

    #[test]
    fn missing_namespace_is_a_validation_error() {
        let mut app = sample_application();
        assert_eq!(app.namespace_or_err().unwrap(), "default");

        app.metadata.namespace = None;
        assert!(matches!(app.namespace_or_err(), Err(Error::Validation(_))));
    }
}
