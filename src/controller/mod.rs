//! Controller for Application resources
//!
//! Follows the Kubernetes controller pattern: observe live state, build the
//! desired state, and converge one dependent at a time.

mod application;
mod finalizer;

pub use application::{
    error_policy, reconcile, ApplicationKubeClient, Context, ContextBuilder, KubeClientImpl,
    DATABASE_CREATED_REQUEUE,
};
pub use finalizer::{finalize, FinalizeOutcome, DATABASE_FINALIZER};
