//! Application operator - converges Application resources into running microservices

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::core::NamespaceResourceScope;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, Resource};

use application_operator::config::Settings;
use application_operator::controller::{error_policy, reconcile, Context};
use application_operator::crd::{Application, Database};
use application_operator::telemetry::init_logging;

/// Application operator - converges Application resources into running microservices
#[derive(Parser, Debug)]
#[command(name = "application-operator", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the Application and Database CRD manifests and exit
    Crd,

    /// Run the controller (default mode)
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => print_crds(),
        Some(Commands::Run) | None => run_controller(cli.settings).await,
    }
}

fn print_crds() -> anyhow::Result<()> {
    let application = serde_yaml::to_string(&Application::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize Application CRD: {}", e))?;
    let database = serde_yaml::to_string(&Database::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize Database CRD: {}", e))?;
    println!("{application}---\n{database}");
    Ok(())
}

/// Namespaced API, or cluster-wide when no namespace is configured
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn run_controller(settings: Settings) -> anyhow::Result<()> {
    init_logging(settings.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let requirements = settings.requirements()?;
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .requirements(requirements)
            .manage_finalizer(settings.manage_finalizer)
            .build(),
    );

    let namespace = settings.watch_namespace();
    let applications: Api<Application> = scoped_api(&client, namespace);
    let deployments: Api<Deployment> = scoped_api(&client, namespace);
    let services: Api<Service> = scoped_api(&client, namespace);
    let secrets: Api<Secret> = scoped_api(&client, namespace);

    tracing::info!(
        namespace = namespace.unwrap_or("<all>"),
        min_kubernetes_version = %settings.min_kubernetes_version,
        manage_finalizer = settings.manage_finalizer,
        "Starting Application controller"
    );

    Controller::new(applications, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Application reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Application reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Application controller stopped");
    Ok(())
}
