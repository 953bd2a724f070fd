//! Process configuration: CLI flags layered over environment variables and
//! an optional config file, using `clap` for flag parsing and the `config`
//! crate for the file/env layers.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::{Error, Result};

/// Kubernetes GPU admission scheduler extender.
#[derive(Debug, Parser)]
#[command(name = "gpu-admission-extender", version = crate::VERSION)]
pub struct Args {
    /// Address the extender HTTP server binds to.
    #[arg(long, env = "EXTENDER_ADDRESS", default_value = "127.0.0.1:3456")]
    pub address: String,

    /// Optional path to a layered config file (TOML/YAML/JSON, sniffed by extension).
    #[arg(long, env = "EXTENDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address for the pprof profiling endpoint. Threaded through to
    /// `Settings` but, like `kubeconfig`/`master`, unused by the in-memory
    /// cluster client this crate ships; a real deployment wires it to its
    /// profiling HTTP server.
    #[arg(long = "pprof-address", env = "EXTENDER_PPROF_ADDRESS")]
    pub pprof_address: Option<String>,

    /// Path to a kubeconfig file; ignored when `--incluster-mode` is set.
    #[arg(long, env = "EXTENDER_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// API server address override, normally discovered from kubeconfig.
    #[arg(long, env = "EXTENDER_MASTER")]
    pub master: Option<String>,

    /// Use the in-cluster service account instead of a kubeconfig file.
    #[arg(long, env = "EXTENDER_INCLUSTER_MODE", default_value_t = false)]
    pub incluster_mode: bool,

    /// Name of the configmap carrying namespace GPU quota.
    #[arg(long, env = "EXTENDER_QUOTA_CONFIGMAP_NAME", default_value = "gpu-quota")]
    pub quota_configmap_name: String,

    /// Namespace of the quota configmap.
    #[arg(long, env = "EXTENDER_QUOTA_CONFIGMAP_NAMESPACE", default_value = "kube-system")]
    pub quota_configmap_namespace: String,

    /// Interval, in seconds, between quota configmap refreshes.
    #[arg(long, env = "EXTENDER_QUOTA_REFRESH_SECONDS", default_value_t = 30)]
    pub quota_refresh_seconds: u64,

    /// Node label carrying the GPU model name.
    #[arg(long, env = "EXTENDER_GPU_MODEL_LABEL", default_value = "gpu-model")]
    pub gpu_model_label: String,

    /// Node label carrying the GPU pool name.
    #[arg(long, env = "EXTENDER_GPU_POOL_LABEL", default_value = "gpu-pool")]
    pub gpu_pool_label: String,

    /// Delay, in microseconds, inserted before the device filter runs to
    /// let recent annotation writes propagate through the informer cache.
    #[arg(long, env = "EXTENDER_DEBOUNCE_MICROS", default_value_t = 300)]
    pub debounce_micros: u64,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "EXTENDER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Resolved configuration, after merging CLI/env with an optional config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub address: String,
    pub pprof_address: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
    pub incluster_mode: bool,
    pub quota_configmap_name: String,
    pub quota_configmap_namespace: String,
    pub quota_refresh_interval: Duration,
    pub gpu_model_label: String,
    pub gpu_pool_label: String,
    pub debounce: Duration,
    pub log_format: String,
}

/// Mirrors `Args`' field names so a config file can override any of them;
/// every field is optional since the file only needs to carry overrides.
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    address: Option<String>,
    quota_configmap_name: Option<String>,
    quota_configmap_namespace: Option<String>,
    quota_refresh_seconds: Option<u64>,
    gpu_model_label: Option<String>,
    gpu_pool_label: Option<String>,
    debounce_micros: Option<u64>,
    log_format: Option<String>,
}

impl Settings {
    /// Build settings from parsed CLI args, optionally overlaying a config
    /// file named by `--config`. File values only fill in what the file
    /// names; everything else keeps its CLI/env/default value.
    pub fn from_args(args: Args) -> Result<Self> {
        let overrides = match &args.config {
            Some(path) => {
                let layered = config::Config::builder()
                    .add_source(config::File::from(path.as_path()).required(true))
                    .build()
                    .map_err(|e| Error::Config(e.to_string()))?;
                layered
                    .try_deserialize::<FileOverrides>()
                    .map_err(|e| Error::Config(e.to_string()))?
            }
            None => FileOverrides::default(),
        };

        Ok(Self {
            address: overrides.address.unwrap_or(args.address),
            pprof_address: args.pprof_address,
            kubeconfig: args.kubeconfig,
            master: args.master,
            incluster_mode: args.incluster_mode,
            quota_configmap_name: overrides.quota_configmap_name.unwrap_or(args.quota_configmap_name),
            quota_configmap_namespace: overrides
                .quota_configmap_namespace
                .unwrap_or(args.quota_configmap_namespace),
            quota_refresh_interval: Duration::from_secs(
                overrides.quota_refresh_seconds.unwrap_or(args.quota_refresh_seconds),
            ),
            gpu_model_label: overrides.gpu_model_label.unwrap_or(args.gpu_model_label),
            gpu_pool_label: overrides.gpu_pool_label.unwrap_or(args.gpu_pool_label),
            debounce: Duration::from_micros(overrides.debounce_micros.unwrap_or(args.debounce_micros)),
            log_format: overrides.log_format.unwrap_or(args.log_format),
        })
    }
}
