//! Deletion gate for Applications
//!
//! An Application carrying [`DATABASE_FINALIZER`] is only released once the
//! Database it references is gone. The operator never deletes the Database
//! itself; it only observes.

use kube::ResourceExt;
use tracing::{debug, warn};

use super::application::ApplicationKubeClient;
use crate::crd::Application;

/// Finalizer holding an Application until its Database is removed
pub const DATABASE_FINALIZER: &str = "database.sample.third.party/finalizer";

/// Result of one deletion check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The Database is gone, the finalizer may be removed
    Complete,
    /// The Database still exists or could not be checked
    Pending,
}

/// Check whether the Application's Database has been removed
///
/// A failed lookup counts as pending so the finalizer is never dropped on
/// uncertain information.
pub async fn finalize(client: &dyn ApplicationKubeClient, app: &Application) -> FinalizeOutcome {
    let db = &app.spec.database_ref;
    match client.get_database(&db.name, &db.namespace).await {
        Ok(None) => {
            debug!(database = %db.name, namespace = %db.namespace, "database is gone");
            FinalizeOutcome::Complete
        }
        Ok(Some(_)) => {
            debug!(database = %db.name, namespace = %db.namespace, "database still present");
            FinalizeOutcome::Pending
        }
        Err(e) => {
            warn!(
                application = %app.name_any(),
                database = %db.name,
                error = %e,
                "could not check database, keeping finalizer"
            );
            FinalizeOutcome::Pending
        }
    }
}

/// Add the finalizer to the local copy, returning whether it changed
pub fn add_finalizer(app: &mut Application) -> bool {
    if app.has_finalizer(DATABASE_FINALIZER) {
        return false;
    }
    app.finalizers_mut().push(DATABASE_FINALIZER.to_string());
    true
}

/// Remove the finalizer from the local copy, returning whether it changed
pub fn remove_finalizer(app: &mut Application) -> bool {
    let finalizers = app.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != DATABASE_FINALIZER);
    finalizers.len() != before
}
