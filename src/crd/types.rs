//! Supporting types shared by the Application and Database CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Value of an Application condition
///
/// `DatabaseExists` is the only condition written as `False`; the others are
/// recorded `True` or not at all. `Unknown` is what a lookup reports for a
/// type with no entry.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Holds
    True,
    /// Does not hold
    False,
    /// Not recorded
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Wire spelling, as shown by `kubectl get applications`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in `status.conditions` of an Application
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// `ResourceFound`, `InstallReady`, `Failed`, `DatabaseExists` or `Succeeded`
    #[serde(rename = "type")]
    pub type_: String,

    /// Current value
    pub status: ConditionStatus,

    /// Outcome key the ledger deduplicates on, e.g. `AllRequirementsMet`
    pub reason: String,

    /// Text for humans, fixed per condition kind
    pub message: String,

    /// When this entry was recorded
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Stamp a condition with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            reason: reason.into(),
            message: message.into(),
            status,
            last_transition_time: Utc::now(),
        }
    }
}

/// Reference to a Database object by name and namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct DatabaseRef {
    /// Database object name
    #[serde(default = "default_database_name")]
    pub name: String,

    /// Namespace the Database object lives in
    #[serde(default = "default_database_namespace")]
    pub namespace: String,
}

impl Default for DatabaseRef {
    fn default() -> Self {
        Self {
            name: default_database_name(),
            namespace: default_database_namespace(),
        }
    }
}

fn default_database_name() -> String {
    "database".to_string()
}

fn default_database_namespace() -> String {
    "database".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: Conditions follow Kubernetes conventions with type, status,
    /// reason, message and a timestamp set at construction.
    #[test]
    fn story_conditions_follow_kubernetes_conventions() {
        let before = Utc::now();
        let condition = Condition::new(
            "DatabaseExists",
            ConditionStatus::False,
            "DatabaseExists",
            "The database exists",
        );
        let after = Utc::now();

        assert_eq!(condition.type_, "DatabaseExists");
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(condition.last_transition_time >= before);
        assert!(condition.last_transition_time <= after);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Succeeded", ConditionStatus::True, "InstallSucceeded", "ok");
        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["type"], "Succeeded");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn default_condition_status_is_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn database_ref_fills_missing_fields_with_defaults() {
        let parsed: DatabaseRef = serde_json::from_str(r#"{"name":"shopdb"}"#).unwrap();
        assert_eq!(parsed.name, "shopdb");
        assert_eq!(parsed.namespace, "database");

        let empty: DatabaseRef = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, DatabaseRef::default());
    }
}
