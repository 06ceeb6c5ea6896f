//! Database Custom Resource Definition
//!
//! Owned by a separate database operator. This operator only creates the
//! object when missing and watches for its disappearance on deletion.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Connection details for a database provisioned by the database operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.sample.third.party",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Database user
    #[serde(default)]
    pub user: String,
    /// Database password
    #[serde(default)]
    pub password: String,
    /// Connection URL
    #[serde(default)]
    pub url: String,
    /// TLS certificate
    #[serde(default)]
    pub certificate: String,
}
