//! Custom Resource Definitions for the application operator

mod application;
mod database;
mod types;

pub use application::{Application, ApplicationSpec, ApplicationStatus};
pub use database::{Database, DatabaseSpec};
pub use types::{Condition, ConditionStatus, DatabaseRef};
