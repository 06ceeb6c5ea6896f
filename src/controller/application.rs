//! Application controller implementation
//!
//! Converges an Application into its dependent resources. Each pass reads
//! live state, builds the desired state, and issues at most one write per
//! dependent. Progress is recorded as conditions on the Application status,
//! written as soon as they change so an aborted pass keeps what it recorded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::finalizer::{add_finalizer, finalize, remove_finalizer, FinalizeOutcome, DATABASE_FINALIZER};
use crate::capabilities::{CapabilityCache, CapabilityProbe, KubeCapabilityProbe, Requirements};
use crate::conditions::{ConditionKind, ConditionLedger};
use crate::crd::{Application, ApplicationStatus, ConditionStatus, Database};
use crate::error::{is_conflict, is_not_found};
use crate::fingerprint::FINGERPRINT_LABEL;
use crate::workload::GeneratedWorkloads;
use crate::Error;

/// Field manager name used for patches
const FIELD_MANAGER: &str = "application-operator";

/// Requeue delay after creating the Database reference
pub const DATABASE_CREATED_REQUEUE: Duration = Duration::from_secs(1);

/// Trait abstracting Kubernetes client operations for Applications
///
/// Every `get_*` returns `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationKubeClient: Send + Sync {
    /// Fetch an Application
    async fn get_application(&self, name: &str, namespace: &str)
        -> Result<Option<Application>, Error>;

    /// Write the Application's finalizers, returning the stored object
    async fn update_application(&self, app: &Application) -> Result<Application, Error>;

    /// Write the Application's status subresource, returning the stored object
    async fn update_application_status(&self, app: &Application) -> Result<Application, Error>;

    /// Fetch a Database
    async fn get_database(&self, name: &str, namespace: &str) -> Result<Option<Database>, Error>;

    /// Create a Database
    async fn create_database(&self, database: &Database) -> Result<(), Error>;

    /// Fetch a Secret
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Fetch a Deployment
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Replace a Deployment
    async fn update_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Fetch a Service
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn create<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(e) if is_conflict(&e) => Err(Error::AlreadyExists {
            kind,
            name: obj.meta().name.clone().unwrap_or_default(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn conflict_or(kind: &'static str, name: &str, e: kube::Error) -> Error {
    if is_conflict(&e) {
        Error::Conflict {
            kind,
            name: name.to_string(),
        }
    } else {
        e.into()
    }
}

#[async_trait]
impl ApplicationKubeClient for KubeClientImpl {
    async fn get_application(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Application>, Error> {
        get_opt(&self.api(namespace), name).await
    }

    async fn update_application(&self, app: &Application) -> Result<Application, Error> {
        let name = app.name_any();
        let api: Api<Application> = self.api(&app.namespace_or_err()?);

        // resourceVersion makes the merge patch fail with 409 on a stale copy
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": app.finalizers(),
                "resourceVersion": app.resource_version(),
            }
        });

        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or("Application", &name, e))
    }

    async fn update_application_status(&self, app: &Application) -> Result<Application, Error> {
        let name = app.name_any();
        let api: Api<Application> = self.api(&app.namespace_or_err()?);

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": app.resource_version() },
            "status": app.status,
        });

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or("Application", &name, e))
    }

    async fn get_database(&self, name: &str, namespace: &str) -> Result<Option<Database>, Error> {
        get_opt(&self.api(namespace), name).await
    }

    async fn create_database(&self, database: &Database) -> Result<(), Error> {
        let namespace = database.namespace().unwrap_or_default();
        create(&self.api(&namespace), "Database", database).await
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        get_opt(&self.api(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret.namespace().unwrap_or_default();
        create(&self.api(&namespace), "Secret", secret).await
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        get_opt(&self.api(namespace), name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        create(&self.api(&namespace), "Deployment", deployment).await
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let name = deployment.name_any();
        let api: Api<Deployment> = self.api(&deployment.namespace().unwrap_or_default());
        api.replace(&name, &PostParams::default(), deployment)
            .await
            .map(|_| ())
            .map_err(|e| conflict_or("Deployment", &name, e))
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        get_opt(&self.api(namespace), name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service.namespace().unwrap_or_default();
        create(&self.api(&namespace), "Service", service).await
    }
}

/// Controller context shared across reconciles
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .requirements(Requirements::parse("1.25")?)
///     .manage_finalizer(true)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn ApplicationKubeClient>,
    /// Source of cluster capabilities
    pub probe: Arc<dyn CapabilityProbe>,
    /// Last successfully probed capabilities
    pub capabilities: CapabilityCache,
    /// Minimum cluster the operator installs into
    pub requirements: Requirements,
    /// Whether to add the deletion finalizer after a successful install
    pub manage_finalizer: bool,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn ApplicationKubeClient>, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            kube,
            probe,
            capabilities: CapabilityCache::new(),
            requirements: Requirements::default(),
            manage_finalizer: false,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn ApplicationKubeClient>>,
    probe: Option<Arc<dyn CapabilityProbe>>,
    requirements: Requirements,
    manage_finalizer: bool,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            probe: None,
            requirements: Requirements::default(),
            manage_finalizer: false,
        }
    }

    /// Set the minimum cluster version
    pub fn requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Add the deletion finalizer after a successful install
    pub fn manage_finalizer(mut self, enabled: bool) -> Self {
        self.manage_finalizer = enabled;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn ApplicationKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the capability probe (primarily for testing)
    pub fn capability_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            probe: self
                .probe
                .unwrap_or_else(|| Arc::new(KubeCapabilityProbe::new(self.client.clone()))),
            capabilities: CapabilityCache::new(),
            requirements: self.requirements,
            manage_finalizer: self.manage_finalizer,
        }
    }
}

/// Reconcile an Application
///
/// Steps run in a fixed order and any error aborts the rest of the pass.
/// Conditions recorded before the error stay recorded.
#[instrument(
    skip(app, ctx),
    fields(application = %app.name_any(), namespace = %app.namespace().unwrap_or_default())
)]
pub async fn reconcile(app: Arc<Application>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = app.name_any();
    let namespace = app.namespace_or_err()?;

    let Some(mut app) = ctx.kube.get_application(&name, &namespace).await? else {
        info!("application no longer exists");
        return Ok(Action::await_change());
    };
    debug!("reconciling application");

    record_conditions(&mut app, &ctx, |ledger| {
        ledger.append(ConditionKind::ResourceFound, ConditionStatus::True)
    })
    .await?;

    if let Err(e) = check_prerequisites(&ctx).await {
        warn!(error = %e, "prerequisites not met");
        record_conditions(&mut app, &ctx, |ledger| {
            ledger.append(ConditionKind::RequirementsNotMet, ConditionStatus::True)
        })
        .await?;
        return Err(e);
    }

    record_conditions(&mut app, &ctx, |ledger| {
        let failed = ConditionKind::RequirementsNotMet;
        let cleared = ledger.delete(failed.type_name(), failed.reason());
        let ready = ledger.append(ConditionKind::InstallReady, ConditionStatus::True);
        cleared || ready
    })
    .await?;

    if app.deletion_requested() {
        return handle_deletion(app, &ctx).await;
    }

    let desired = GeneratedWorkloads::compile(&app)?;

    if !converge_database(&mut app, &ctx, &desired).await? {
        return Ok(Action::requeue(DATABASE_CREATED_REQUEUE));
    }
    converge_secret(&ctx, &desired).await?;
    converge_deployment(&ctx, &desired).await?;
    converge_service(&ctx, &desired).await?;

    if ctx.manage_finalizer && add_finalizer(&mut app) {
        info!(finalizer = DATABASE_FINALIZER, "adding finalizer");
        app = ctx.kube.update_application(&app).await?;
    }

    record_conditions(&mut app, &ctx, |ledger| {
        ledger.append(ConditionKind::Succeeded, ConditionStatus::True)
    })
    .await?;

    info!("application converged");
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Every error requeues; the delay depends on the error kind.
pub fn error_policy(app: Arc<Application>, error: &Error, _ctx: Arc<Context>) -> Action {
    match error {
        Error::PrerequisitesNotMet(_) => {
            warn!(%error, application = %app.name_any(), "waiting for cluster prerequisites")
        }
        Error::DatabaseNotDeleted { .. } => {
            info!(%error, application = %app.name_any(), "waiting for database removal")
        }
        _ => error!(?error, application = %app.name_any(), "reconciliation failed"),
    }
    Action::requeue(error.requeue_after())
}

/// Apply a ledger change and persist it if anything changed
///
/// The local copy is replaced by the stored object so later writes carry
/// the current resourceVersion.
async fn record_conditions<F>(app: &mut Application, ctx: &Context, change: F) -> Result<(), Error>
where
    F: FnOnce(&mut ConditionLedger<'_>) -> bool,
{
    let changed = {
        let status = app.status.get_or_insert_with(ApplicationStatus::default);
        change(&mut ConditionLedger::new(&mut status.conditions))
    };
    if !changed {
        return Ok(());
    }
    *app = ctx.kube.update_application_status(app).await?;
    Ok(())
}

/// Check the cluster against the configured requirements
///
/// A cached answer that fails the check is re-probed once, so an upgraded
/// cluster is picked up without a restart.
async fn check_prerequisites(ctx: &Context) -> Result<(), Error> {
    let probe = ctx.probe.as_ref();
    let cached = ctx
        .capabilities
        .get_or_probe(probe)
        .await
        .map_err(|e| Error::prerequisites(e.to_string()))?;
    debug!(
        version = %cached.server_version,
        openshift = cached.runs_on_openshift,
        "cluster capabilities"
    );
    if ctx.requirements.check(&cached).is_ok() {
        return Ok(());
    }

    let fresh = ctx
        .capabilities
        .refresh(probe)
        .await
        .map_err(|e| Error::prerequisites(e.to_string()))?;
    ctx.requirements.check(&fresh)
}

/// Release the finalizer once the Database is gone
///
/// A pending deletion leaves the Application untouched.
async fn handle_deletion(mut app: Application, ctx: &Context) -> Result<Action, Error> {
    if !app.has_finalizer(DATABASE_FINALIZER) {
        debug!("deletion requested, no finalizer to release");
        return Ok(Action::await_change());
    }

    match finalize(ctx.kube.as_ref(), &app).await {
        FinalizeOutcome::Complete => {
            remove_finalizer(&mut app);
            ctx.kube.update_application(&app).await?;
            info!(finalizer = DATABASE_FINALIZER, "database removed, finalizer released");
            Ok(Action::await_change())
        }
        FinalizeOutcome::Pending => Err(Error::DatabaseNotDeleted {
            name: app.spec.database_ref.name.clone(),
            namespace: app.spec.database_ref.namespace.clone(),
        }),
    }
}

/// Ensure the Database exists, returning whether it already did
async fn converge_database(
    app: &mut Application,
    ctx: &Context,
    desired: &GeneratedWorkloads,
) -> Result<bool, Error> {
    let names = &desired.names;
    let exists = ctx
        .kube
        .get_database(&names.database, &names.database_namespace)
        .await?
        .is_some();

    let status = if exists {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    record_conditions(app, ctx, |ledger| {
        ledger.set_status(ConditionKind::DatabaseExists, status)
    })
    .await?;

    if !exists {
        info!(
            database = %names.database,
            database_namespace = %names.database_namespace,
            "creating database"
        );
        ctx.kube.create_database(&desired.database).await?;
    }
    Ok(exists)
}

async fn converge_secret(ctx: &Context, desired: &GeneratedWorkloads) -> Result<(), Error> {
    let names = &desired.names;
    if ctx.kube.get_secret(&names.secret, &names.namespace).await?.is_none() {
        info!(secret = %names.secret, "creating secret");
        ctx.kube.create_secret(&desired.secret).await?;
    }
    Ok(())
}

/// Create the Deployment, or heal replica drift on an existing one
///
/// Only the replica count is healed. Any other difference shows up as a
/// fingerprint mismatch and is logged.
async fn converge_deployment(ctx: &Context, desired: &GeneratedWorkloads) -> Result<(), Error> {
    let names = &desired.names;
    let Some(mut live) = ctx
        .kube
        .get_deployment(&names.deployment, &names.namespace)
        .await?
    else {
        info!(deployment = %names.deployment, "creating deployment");
        return ctx.kube.create_deployment(&desired.deployment).await;
    };

    let live_fingerprint = live.labels().get(FINGERPRINT_LABEL).map(String::as_str);
    let Some(desired_fingerprint) = desired.deployment_fingerprint() else {
        return Err(Error::validation("desired deployment has no fingerprint"));
    };
    if live_fingerprint == Some(desired_fingerprint) {
        debug!(deployment = %names.deployment, "deployment up to date");
        return Ok(());
    }

    let desired_fingerprint = desired_fingerprint.to_string();
    let live_replicas = live.spec.as_ref().and_then(|s| s.replicas);
    if live_replicas == desired.replicas() {
        warn!(
            deployment = %names.deployment,
            live = ?live_fingerprint,
            desired = %desired_fingerprint,
            "deployment differs from desired state, only replica drift is healed"
        );
        return Ok(());
    }

    info!(
        deployment = %names.deployment,
        from = ?live_replicas,
        to = ?desired.replicas(),
        "scaling deployment"
    );
    live.spec.get_or_insert_with(Default::default).replicas = desired.replicas();
    live.labels_mut()
        .insert(FINGERPRINT_LABEL.to_string(), desired_fingerprint);
    ctx.kube.update_deployment(&live).await
}

async fn converge_service(ctx: &Context, desired: &GeneratedWorkloads) -> Result<(), Error> {
    let names = &desired.names;
    if ctx.kube.get_service(&names.service, &names.namespace).await?.is_none() {
        info!(service = %names.service, "creating service");
        ctx.kube.create_service(&desired.service).await?;
    }
    Ok(())
}
