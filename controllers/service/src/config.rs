//! Command-line and environment configuration.
//!
//! Every flag can also be supplied through the environment variable named in
//! its `env` attribute. The parsed values are frozen into an `OperatorConfig`
//! that the reconciliation core shares read-only.

use crate::error::ControllerError;
use clap::Parser;
use crds::DEFAULT_INTERNET_POOL;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Service Controller command line
#[derive(Debug, Clone, Parser)]
#[command(
    name = "service-controller",
    version,
    about = "Syncs externally exposed Services to firewall NAT and security policies"
)]
pub struct Cli {
    /// Absolute path to the kubeconfig file (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespaces whose Services are never managed
    #[arg(long, env = "IGNORE_NAMESPACES", value_delimiter = ',')]
    pub ignore_namespaces: Vec<String>,

    /// Only watch Services in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Pool used when a Service has no external-pool annotation
    #[arg(long, env = "DEFAULT_POOL", default_value = DEFAULT_INTERNET_POOL)]
    pub default_pool: String,

    /// Security policy log setting name
    #[arg(long, env = "LOG_SETTING", default_value = "")]
    pub log_setting: String,

    /// Security policy group name
    #[arg(long, env = "SECURITY_GROUP", default_value = "")]
    pub group: String,

    /// Service objects allowed by each security policy
    #[arg(long, env = "SECURITY_SERVICES", value_delimiter = ',', default_value = "any")]
    pub services: Vec<String>,

    /// Destination zones of each security policy
    #[arg(long, env = "DESTINATION_ZONES", value_delimiter = ',', default_value = "untrust")]
    pub destination_zones: Vec<String>,

    /// Number of reconcile loops
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Seconds between full resyncs of every known Service (0 disables)
    #[arg(long, env = "RESYNC_PERIOD", default_value_t = 300)]
    pub resync_period: u64,
}

impl Cli {
    /// Validate the flags and build the immutable core configuration.
    pub fn operator_config(&self) -> Result<OperatorConfig, ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "--workers must be at least 1".to_string(),
            ));
        }
        if self.default_pool.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "--default-pool must not be empty".to_string(),
            ));
        }

        Ok(OperatorConfig {
            ignore_namespaces: clean(&self.ignore_namespaces).into_iter().collect(),
            default_pool: self.default_pool.trim().to_string(),
            log_setting: self.log_setting.clone(),
            group: self.group.clone(),
            services: clean(&self.services),
            destination_zones: clean(&self.destination_zones),
        })
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_period > 0).then(|| Duration::from_secs(self.resync_period))
    }
}

fn clean(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Static settings consumed by the reconciliation core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub ignore_namespaces: BTreeSet<String>,
    pub default_pool: String,
    pub log_setting: String,
    pub group: String,
    pub services: Vec<String>,
    pub destination_zones: Vec<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            ignore_namespaces: BTreeSet::new(),
            default_pool: DEFAULT_INTERNET_POOL.to_string(),
            log_setting: String::new(),
            group: String::new(),
            services: vec!["any".to_string()],
            destination_zones: vec!["untrust".to_string()],
        }
    }
}
