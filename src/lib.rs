//! Application operator - converges Application resources into running microservices
//!
//! An `Application` declares a microservice backed by a database. The
//! operator keeps four dependents in line with it and records progress as
//! status conditions.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Application, Database)
//! - [`controller`] - Reconciliation loop and deletion gate
//! - [`workload`] - Desired state of the Database, Secret, Deployment and Service
//! - [`conditions`] - Condition ledger on the Application status
//! - [`fingerprint`] - Content fingerprints for drift detection
//! - [`capabilities`] - Cluster capability discovery and prerequisite checks
//! - [`config`] - Operator settings
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod capabilities;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod fingerprint;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
