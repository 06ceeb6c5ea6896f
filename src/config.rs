//! Operator settings
//!
//! Every flag can also be set through its environment variable, which is how
//! the operator is usually configured when running in-cluster.

use clap::{Args, ValueEnum};

use crate::capabilities::Requirements;
use crate::Error;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Settings for the controller
#[derive(Args, Clone, Debug)]
pub struct Settings {
    /// Only watch Applications in this namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Minimum Kubernetes version, as major.minor
    #[arg(long, env = "MIN_KUBERNETES_VERSION", default_value = "1.19")]
    pub min_kubernetes_version: String,

    /// Add the database finalizer to Applications after a successful install
    #[arg(long, env = "MANAGE_FINALIZER")]
    pub manage_finalizer: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            min_kubernetes_version: "1.19".to_string(),
            manage_finalizer: false,
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Parsed minimum cluster version
    pub fn requirements(&self) -> Result<Requirements, Error> {
        Requirements::parse(&self.min_kubernetes_version)
    }

    /// Namespace to watch, `None` meaning every namespace
    pub fn watch_namespace(&self) -> Option<&str> {
        self.watch_namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        TestCli::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .unwrap()
            .settings
    }

    #[test]
    fn defaults_match_default_impl() {
        let parsed = parse(&[]);
        let default = Settings::default();

        assert_eq!(parsed.min_kubernetes_version, default.min_kubernetes_version);
        assert_eq!(parsed.manage_finalizer, default.manage_finalizer);
        assert_eq!(parsed.log_format, default.log_format);
        assert_eq!(parsed.requirements().unwrap(), Requirements::default());
    }

    #[test]
    fn flags_override_defaults() {
        let settings = parse(&[
            "--watch-namespace",
            "shop",
            "--min-kubernetes-version",
            "1.27",
            "--manage-finalizer",
            "--log-format",
            "json",
        ]);

        assert_eq!(settings.watch_namespace(), Some("shop"));
        assert!(settings.manage_finalizer);
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.requirements().unwrap().min_minor, 27);
    }

    #[test]
    fn blank_namespace_means_all_namespaces() {
        let settings = Settings {
            watch_namespace: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.watch_namespace(), None);
    }

    #[test]
    fn malformed_version_is_rejected() {
        let settings = Settings {
            min_kubernetes_version: "latest".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.requirements(), Err(Error::Validation(_))));
    }
}
