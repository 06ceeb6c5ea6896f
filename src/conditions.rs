//! Condition ledger for Application status
//!
//! Conditions have two independent identities:
//! - by **type** when asking "what is the current value of X"
//!   ([`ConditionLedger::status_of`])
//! - by **reason** when asking "has this outcome been recorded already"
//!   ([`ConditionLedger::contains_reason`])
//!
//! Appending is reason-keyed and idempotent. Entries are only removed by an
//! explicit [`ConditionLedger::delete`] on an exact `(type, reason)` pair, so
//! appending a new reason under an existing type keeps the older entry.

use crate::crd::{Condition, ConditionStatus};

/// The conditions this operator writes, with their fixed type/reason/message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionKind {
    /// The Application object was found; only ever True
    ResourceFound,
    /// Cluster prerequisites are met; only ever True
    InstallReady,
    /// Cluster prerequisites are not met; only ever True
    RequirementsNotMet,
    /// Whether the referenced Database exists; True or False
    DatabaseExists,
    /// All dependents converged; only ever True
    Succeeded,
}

impl ConditionKind {
    /// Condition type
    pub fn type_name(self) -> &'static str {
        match self {
            Self::ResourceFound => "ResourceFound",
            Self::InstallReady => "InstallReady",
            Self::RequirementsNotMet => "Failed",
            Self::DatabaseExists => "DatabaseExists",
            Self::Succeeded => "Succeeded",
        }
    }

    /// Machine-readable reason
    pub fn reason(self) -> &'static str {
        match self {
            Self::ResourceFound => "ResourceFound",
            Self::InstallReady => "AllRequirementsMet",
            Self::RequirementsNotMet => "RequirementsNotMet",
            Self::DatabaseExists => "DatabaseExists",
            Self::Succeeded => "InstallSucceeded",
        }
    }

    /// Human-readable message
    pub fn message(self) -> &'static str {
        match self {
            Self::ResourceFound => "Resource found in k8s",
            Self::InstallReady => "All requirements met, attempting install",
            Self::RequirementsNotMet => "Not all requirements met",
            Self::DatabaseExists => "The database exists",
            Self::Succeeded => "Application has been installed",
        }
    }

    /// Build a fresh condition of this kind
    pub fn condition(self, status: ConditionStatus) -> Condition {
        Condition::new(self.type_name(), status, self.reason(), self.message())
    }
}

/// Mutable view over an ordered condition list
///
/// Every mutating method returns `true` when the list changed, so callers
/// only persist status when there is something to write.
pub struct ConditionLedger<'a> {
    conditions: &'a mut Vec<Condition>,
}

impl<'a> ConditionLedger<'a> {
    /// Wrap a condition list
    pub fn new(conditions: &'a mut Vec<Condition>) -> Self {
        Self { conditions }
    }

    /// Has a condition with this reason been recorded?
    pub fn contains_reason(&self, reason: &str) -> bool {
        self.conditions.iter().any(|c| c.reason == reason)
    }

    /// Current status for a condition type
    ///
    /// The latest entry of that type wins; `Unknown` when none is recorded.
    pub fn status_of(&self, type_: &str) -> ConditionStatus {
        self.conditions
            .iter()
            .rev()
            .find(|c| c.type_ == type_)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    /// Append a condition unless its reason is already recorded
    pub fn append(&mut self, kind: ConditionKind, status: ConditionStatus) -> bool {
        if self.contains_reason(kind.reason()) {
            return false;
        }
        self.conditions.push(kind.condition(status));
        true
    }

    /// Remove every condition matching both type and reason
    pub fn delete(&mut self, type_: &str, reason: &str) -> bool {
        let before = self.conditions.len();
        self.conditions
            .retain(|c| !(c.type_ == type_ && c.reason == reason));
        self.conditions.len() != before
    }

    /// Record `kind` with `status`, replacing a previous entry whose status differs
    ///
    /// A no-op when the same status is already recorded.
    pub fn set_status(&mut self, kind: ConditionKind, status: ConditionStatus) -> bool {
        if !self.contains_reason(kind.reason()) {
            return self.append(kind, status);
        }
        if self.status_of(kind.type_name()) == status {
            return false;
        }
        self.delete(kind.type_name(), kind.reason());
        self.conditions.push(kind.condition(status));
        true
    }
}
