//! Desired state of the resources an Application owns or references
//!
//! Everything here is pure: given an [`Application`] it produces the
//! canonical definition of each dependent resource without touching the
//! cluster. The controller compares these against live objects.
//!
//! - Database: referenced by `spec.databaseRef`, never owned
//! - Secret: greeting message consumed by the microservice
//! - Deployment: the microservice itself, labelled with its spec fingerprint
//! - Service: NodePort exposure of the microservice

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec,
    Probe, Secret, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::{Application, Database, DatabaseSpec};
use crate::fingerprint::{fingerprint, FINGERPRINT_LABEL};
use crate::Error;

// =============================================================================
// Constants
// =============================================================================

/// Microservice container image
pub const MICROSERVICE_IMAGE: &str = "docker.io/nheidloff/simple-microservice:latest";

/// Port the microservice listens on, also used for probes and the Service
pub const MICROSERVICE_PORT: i32 = 8081;

/// Fixed node port of the microservice Service
pub const MICROSERVICE_NODE_PORT: i32 = 30548;

/// Pod selector label shared by the Deployment and the Service
pub const APP_LABEL_KEY: &str = "app";

/// Value of [`APP_LABEL_KEY`]
pub const APP_LABEL_VALUE: &str = "myapplication";

/// Secret key (and env var name) carrying the greeting
pub const GREETING_KEY: &str = "GREETING_MESSAGE";

/// Greeting written to a newly created Secret
pub const GREETING_VALUE: &str = "World";

const READINESS_PATH: &str = "/q/health/live";
const READINESS_INITIAL_DELAY: i32 = 20;
const LIVENESS_PATH: &str = "/q/health/ready";
const LIVENESS_INITIAL_DELAY: i32 = 40;

// =============================================================================
// Derived Names
// =============================================================================

/// Names of every dependent resource for one Application
///
/// Computed once per reconcile and passed along; never cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependentNames {
    /// Namespace of the Application and of its owned resources
    pub namespace: String,
    /// Secret name
    pub secret: String,
    /// Deployment name
    pub deployment: String,
    /// Service name
    pub service: String,
    /// Microservice container name
    pub container: String,
    /// Referenced Database name
    pub database: String,
    /// Referenced Database namespace
    pub database_namespace: String,
}

impl DependentNames {
    /// Derive names from an Application
    pub fn for_application(app: &Application) -> Result<Self, Error> {
        let name = app.name_any();
        Ok(Self {
            namespace: app.namespace_or_err()?,
            secret: format!("{name}-secret-greeting"),
            deployment: format!("{name}-deployment-microservice"),
            service: format!("{name}-service-microservice"),
            container: format!("{name}-microservice"),
            database: app.spec.database_ref.name.clone(),
            database_namespace: app.spec.database_ref.namespace.clone(),
        })
    }
}

// =============================================================================
// Generated Workloads Container
// =============================================================================

/// Desired state of every dependent resource of an Application
#[derive(Clone, Debug)]
pub struct GeneratedWorkloads {
    /// Names the resources below were built with
    pub names: DependentNames,
    /// Referenced Database
    pub database: Database,
    /// Greeting Secret
    pub secret: Secret,
    /// Microservice Deployment, carrying [`FINGERPRINT_LABEL`]
    pub deployment: Deployment,
    /// NodePort Service
    pub service: Service,
}

impl GeneratedWorkloads {
    /// Build the full desired state for an Application
    pub fn compile(app: &Application) -> Result<Self, Error> {
        let names = DependentNames::for_application(app)?;
        Ok(Self {
            database: build_database(&names),
            secret: build_secret(app, &names)?,
            deployment: build_deployment(app, &names)?,
            service: build_service(app, &names)?,
            names,
        })
    }

    /// Fingerprint label value of the desired Deployment
    pub fn deployment_fingerprint(&self) -> Option<&str> {
        self.deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(FINGERPRINT_LABEL))
            .map(String::as_str)
    }

    /// Desired replica count
    pub fn replicas(&self) -> Option<i32> {
        self.deployment.spec.as_ref().and_then(|s| s.replicas)
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Controller owner reference pointing at the Application
pub fn owner_reference(app: &Application) -> Result<OwnerReference, Error> {
    app.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!(
            "application {} has no uid, cannot own dependents",
            app.name_any()
        ))
    })
}

fn owned_meta(app: &Application, name: &str, namespace: &str) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        owner_references: Some(vec![owner_reference(app)?]),
        ..Default::default()
    })
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string())])
}

fn http_probe(path: &str, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(MICROSERVICE_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        ..Default::default()
    }
}

/// Database the Application references
///
/// No owner reference: the database outlives the application and is
/// managed by its own operator.
pub fn build_database(names: &DependentNames) -> Database {
    let mut database = Database::new(
        &names.database,
        DatabaseSpec {
            user: "name".to_string(),
            password: "password".to_string(),
            url: "url".to_string(),
            certificate: "certificate".to_string(),
        },
    );
    database.metadata.namespace = Some(names.database_namespace.clone());
    database
}

/// Opaque Secret holding the greeting
pub fn build_secret(app: &Application, names: &DependentNames) -> Result<Secret, Error> {
    Ok(Secret {
        metadata: owned_meta(app, &names.secret, &names.namespace)?,
        type_: Some("Opaque".to_string()),
        immutable: Some(false),
        string_data: Some(BTreeMap::from([(
            GREETING_KEY.to_string(),
            GREETING_VALUE.to_string(),
        )])),
        ..Default::default()
    })
}

/// Microservice Deployment
///
/// The fingerprint label is computed over the finished spec and attached in
/// the same value, so whoever writes this object writes both together.
pub fn build_deployment(app: &Application, names: &DependentNames) -> Result<Deployment, Error> {
    let container = Container {
        name: names.container.clone(),
        image: Some(MICROSERVICE_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: MICROSERVICE_PORT,
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: GREETING_KEY.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: names.secret.clone(),
                    key: GREETING_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        readiness_probe: Some(http_probe(READINESS_PATH, READINESS_INITIAL_DELAY)),
        liveness_probe: Some(http_probe(LIVENESS_PATH, LIVENESS_INITIAL_DELAY)),
        ..Default::default()
    };

    let spec = DeploymentSpec {
        replicas: Some(app.spec.replica_count),
        selector: LabelSelector {
            match_labels: Some(app_labels()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(app_labels()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    let mut metadata = owned_meta(app, &names.deployment, &names.namespace)?;
    metadata.labels = Some(BTreeMap::from([(
        FINGERPRINT_LABEL.to_string(),
        fingerprint(&spec)?,
    )]));

    Ok(Deployment {
        metadata,
        spec: Some(spec),
        ..Default::default()
    })
}

/// NodePort Service in front of the microservice
pub fn build_service(app: &Application, names: &DependentNames) -> Result<Service, Error> {
    Ok(Service {
        metadata: owned_meta(app, &names.service, &names.namespace)?,
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(app_labels()),
            ports: Some(vec![ServicePort {
                port: MICROSERVICE_PORT,
                target_port: Some(IntOrString::Int(MICROSERVICE_PORT)),
                node_port: Some(MICROSERVICE_NODE_PORT),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApplicationSpec, DatabaseRef};

    fn make_application(name: &str, namespace: &str, replicas: i32) -> Application {
        let mut app = Application::new(
            name,
            ApplicationSpec {
                version: "1.0.0".to_string(),
                replica_count: replicas,
                database_ref: DatabaseRef {
                    name: "shopdb".to_string(),
                    namespace: "default".to_string(),
                },
                schema_url: None,
                title: None,
            },
        );
        app.metadata.namespace = Some(namespace.to_string());
        app.metadata.uid = Some(format!("{name}-uid"));
        app
    }

    fn owner_of(meta: &ObjectMeta) -> &OwnerReference {
        &meta.owner_references.as_ref().unwrap()[0]
    }

    // =========================================================================
    // Story: Names Derive From The Application
    // =========================================================================

    #[test]
    fn story_names_follow_the_application_name() {
        let names = DependentNames::for_application(&make_application("shop", "default", 2)).unwrap();

        assert_eq!(names.namespace, "default");
        assert_eq!(names.secret, "shop-secret-greeting");
        assert_eq!(names.deployment, "shop-deployment-microservice");
        assert_eq!(names.service, "shop-service-microservice");
        assert_eq!(names.container, "shop-microservice");
        assert_eq!(names.database, "shopdb");
        assert_eq!(names.database_namespace, "default");
    }

    #[test]
    fn names_require_a_namespace() {
        let mut app = make_application("shop", "default", 2);
        app.metadata.namespace = None;
        assert!(matches!(
            DependentNames::for_application(&app),
            Err(Error::Validation(_))
        ));
    }

    // =========================================================================
    // Story: Owned Resources Point Back At The Application
    // =========================================================================

    #[test]
    fn story_owned_resources_carry_controller_reference() {
        let app = make_application("shop", "default", 2);
        let output = GeneratedWorkloads::compile(&app).unwrap();

        for meta in [
            &output.secret.metadata,
            &output.deployment.metadata,
            &output.service.metadata,
        ] {
            let owner = owner_of(meta);
            assert_eq!(owner.kind, "Application");
            assert_eq!(owner.name, "shop");
            assert_eq!(owner.uid, "shop-uid");
            assert_eq!(owner.controller, Some(true));
        }
        assert!(output.database.metadata.owner_references.is_none());
    }

    #[test]
    fn compile_fails_without_uid() {
        let mut app = make_application("shop", "default", 2);
        app.metadata.uid = None;
        assert!(matches!(
            GeneratedWorkloads::compile(&app),
            Err(Error::Validation(_))
        ));
    }

    // =========================================================================
    // Story: Database Reference
    // =========================================================================

    #[test]
    fn story_database_uses_reference_namespace() {
        let mut app = make_application("shop", "team-a", 1);
        app.spec.database_ref.namespace = "databases".to_string();
        let names = DependentNames::for_application(&app).unwrap();

        let db = build_database(&names);
        assert_eq!(db.metadata.name.as_deref(), Some("shopdb"));
        assert_eq!(db.metadata.namespace.as_deref(), Some("databases"));
        assert_eq!(db.spec.user, "name");
        assert_eq!(db.spec.password, "password");
        assert_eq!(db.spec.url, "url");
        assert_eq!(db.spec.certificate, "certificate");
    }

    // =========================================================================
    // Story: Secret
    // =========================================================================

    #[test]
    fn story_secret_holds_greeting() {
        let output = GeneratedWorkloads::compile(&make_application("shop", "default", 1)).unwrap();
        let secret = output.secret;

        assert_eq!(secret.metadata.name.as_deref(), Some("shop-secret-greeting"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.immutable, Some(false));
        assert_eq!(
            secret.string_data.unwrap().get(GREETING_KEY).map(String::as_str),
            Some("World")
        );
    }

    // =========================================================================
    // Story: Deployment
    // =========================================================================

    #[test]
    fn story_deployment_runs_the_microservice() {
        let output = GeneratedWorkloads::compile(&make_application("shop", "default", 2)).unwrap();
        let spec = output.deployment.spec.as_ref().unwrap();

        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.selector.match_labels, Some(app_labels()));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.name, "shop-microservice");
        assert_eq!(container.image.as_deref(), Some(MICROSERVICE_IMAGE));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8081);

        let env = &container.env.as_ref().unwrap()[0];
        assert_eq!(env.name, GREETING_KEY);
        let secret_ref = env
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret_ref.name, "shop-secret-greeting");
        assert_eq!(secret_ref.key, GREETING_KEY);
    }

    #[test]
    fn deployment_probes_target_health_endpoints() {
        let output = GeneratedWorkloads::compile(&make_application("shop", "default", 1)).unwrap();
        let pod = output.deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];

        let readiness = container.readiness_probe.as_ref().unwrap();
        assert_eq!(
            readiness.http_get.as_ref().unwrap().path.as_deref(),
            Some("/q/health/live")
        );
        assert_eq!(readiness.initial_delay_seconds, Some(20));

        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(
            liveness.http_get.as_ref().unwrap().path.as_deref(),
            Some("/q/health/ready")
        );
        assert_eq!(liveness.initial_delay_seconds, Some(40));
    }

    /// Story: the fingerprint label always describes the spec it sits next to
    #[test]
    fn story_deployment_label_matches_its_spec() {
        let output = GeneratedWorkloads::compile(&make_application("shop", "default", 2)).unwrap();
        let expected = fingerprint(output.deployment.spec.as_ref().unwrap()).unwrap();

        assert_eq!(output.deployment_fingerprint(), Some(expected.as_str()));
        assert_eq!(output.replicas(), Some(2));
    }

    #[test]
    fn replica_change_changes_fingerprint() {
        let two = GeneratedWorkloads::compile(&make_application("shop", "default", 2)).unwrap();
        let five = GeneratedWorkloads::compile(&make_application("shop", "default", 5)).unwrap();
        let again = GeneratedWorkloads::compile(&make_application("shop", "default", 2)).unwrap();

        assert_ne!(two.deployment_fingerprint(), five.deployment_fingerprint());
        assert_eq!(two.deployment_fingerprint(), again.deployment_fingerprint());
    }

    // =========================================================================
    // Story: Service
    // =========================================================================

    #[test]
    fn story_service_exposes_fixed_node_port() {
        let output = GeneratedWorkloads::compile(&make_application("shop", "default", 1)).unwrap();
        let spec = output.service.spec.unwrap();

        assert_eq!(output.service.metadata.name.as_deref(), Some("shop-service-microservice"));
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.selector, Some(app_labels()));

        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8081);
        assert_eq!(port.target_port, Some(IntOrString::Int(8081)));
        assert_eq!(port.node_port, Some(30548));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
    }
}
