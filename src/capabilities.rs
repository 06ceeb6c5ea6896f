//! Cluster capability discovery
//!
//! The prerequisite check needs to know what the cluster is before installing
//! anything. A [`CapabilityProbe`] asks the API server; the
//! [`CapabilityCache`] keeps the last successful answer so reconciles don't
//! re-run discovery on every pass.

use std::sync::Arc;

use async_trait::async_trait;
use kube::discovery::Discovery;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Error;

/// API group that only exists on OpenShift clusters
pub const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// What the operator knows about the cluster it runs in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCapabilities {
    /// Full server version string (git version)
    pub server_version: String,
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Whether the OpenShift route API is served
    pub runs_on_openshift: bool,
}

impl ClusterCapabilities {
    /// Build capabilities from the raw `major`/`minor` strings the API server returns
    ///
    /// Providers append suffixes such as `28+`; only the leading digits count.
    pub fn from_version_parts(
        server_version: impl Into<String>,
        major: &str,
        minor: &str,
        runs_on_openshift: bool,
    ) -> Result<Self, Error> {
        Ok(Self {
            server_version: server_version.into(),
            major: parse_version_component(major)?,
            minor: parse_version_component(minor)?,
            runs_on_openshift,
        })
    }
}

fn parse_version_component(raw: &str) -> Result<u32, Error> {
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .map_err(|_| Error::capabilities(format!("invalid version component {raw:?}")))
}

// =============================================================================
// Requirements
// =============================================================================

/// Minimum cluster the operator installs into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requirements {
    /// Minimum major version
    pub min_major: u32,
    /// Minimum minor version
    pub min_minor: u32,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            min_major: 1,
            min_minor: 19,
        }
    }
}

impl Requirements {
    /// Parse a `major.minor` string such as `1.19`
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (major, minor) = raw
            .trim()
            .trim_start_matches('v')
            .split_once('.')
            .ok_or_else(|| Error::validation(format!("expected major.minor, got {raw:?}")))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| Error::validation(format!("invalid version {raw:?}")))
        };
        Ok(Self {
            min_major: parse(major)?,
            min_minor: parse(minor)?,
        })
    }

    /// Check that the cluster satisfies these requirements
    pub fn check(&self, caps: &ClusterCapabilities) -> Result<(), Error> {
        if (caps.major, caps.minor) < (self.min_major, self.min_minor) {
            return Err(Error::prerequisites(format!(
                "kubernetes {}.{} is older than required {}.{}",
                caps.major, caps.minor, self.min_major, self.min_minor
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Source of cluster capabilities
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Ask the cluster what it is
    async fn probe(&self) -> Result<ClusterCapabilities, Error>;
}

/// Probe backed by the API server's version endpoint and API discovery
pub struct KubeCapabilityProbe {
    client: Client,
}

impl KubeCapabilityProbe {
    /// Create a new probe
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CapabilityProbe for KubeCapabilityProbe {
    async fn probe(&self) -> Result<ClusterCapabilities, Error> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::capabilities(format!("server version unavailable: {e}")))?;

        let discovery = Discovery::new(self.client.clone())
            .filter(&[OPENSHIFT_ROUTE_GROUP])
            .run()
            .await
            .map_err(|e| Error::capabilities(format!("API discovery failed: {e}")))?;

        let caps = ClusterCapabilities::from_version_parts(
            info.git_version,
            &info.major,
            &info.minor,
            discovery.has_group(OPENSHIFT_ROUTE_GROUP),
        )?;
        info!(
            version = %caps.server_version,
            openshift = caps.runs_on_openshift,
            "probed cluster capabilities"
        );
        Ok(caps)
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Last successfully probed capabilities, shared across reconciles
///
/// Readers get a cloned `Arc`; a refresh swaps the whole value under the
/// write lock. A failed probe leaves the previous value in place.
#[derive(Clone, Default)]
pub struct CapabilityCache {
    current: Arc<RwLock<Option<Arc<ClusterCapabilities>>>>,
}

impl CapabilityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capabilities, if any probe has succeeded
    pub async fn current(&self) -> Option<Arc<ClusterCapabilities>> {
        self.current.read().await.clone()
    }

    /// Return cached capabilities, probing when the cache is empty
    pub async fn get_or_probe(
        &self,
        probe: &dyn CapabilityProbe,
    ) -> Result<Arc<ClusterCapabilities>, Error> {
        if let Some(caps) = self.current().await {
            debug!("using cached cluster capabilities");
            return Ok(caps);
        }
        self.refresh(probe).await
    }

    /// Probe the cluster and replace the cached value on success
    pub async fn refresh(
        &self,
        probe: &dyn CapabilityProbe,
    ) -> Result<Arc<ClusterCapabilities>, Error> {
        let caps = Arc::new(probe.probe().await?);
        *self.current.write().await = Some(caps.clone());
        Ok(caps)
    }
}
