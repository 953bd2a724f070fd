//! Process entry point: parse configuration, wire up the cluster client,
//! quota store, and filter pipeline, then serve the extender HTTP API.

use std::sync::Arc;

use clap::Parser;
use gpu_admission_extender::api::{router, AppState};
use gpu_admission_extender::cluster::{ClusterClient, InformerCache};
use gpu_admission_extender::config::{Args, Settings};
use gpu_admission_extender::pipeline::{FilterPipeline, LabelKeys};
use gpu_admission_extender::quota::QuotaStore;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = match Settings::from_args(args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&settings.log_format);

    if let Err(e) = run(settings).await {
        tracing::error!(error = %e, "fatal error, exiting");
        std::process::exit(1);
    }
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    // A real deployment would build an `InformerCache` backed by a watch
    // against the kube-apiserver; kubeconfig/master/incluster_mode select
    // that client's credentials and are threaded through here but unused
    // by the in-memory cache. pprof_address would similarly start a
    // profiling server alongside the extender's own listener.
    let _ = (&settings.kubeconfig, &settings.master, settings.incluster_mode, &settings.pprof_address);

    let cluster: Arc<dyn ClusterClient> = Arc::new(InformerCache::new());
    let quota = Arc::new(QuotaStore::new());

    quota
        .refresh_once(cluster.as_ref(), &settings.quota_configmap_name, &settings.quota_configmap_namespace)
        .await?;

    let _refresher = quota.clone().spawn_refresher(
        cluster.clone(),
        settings.quota_configmap_name.clone(),
        settings.quota_configmap_namespace.clone(),
        settings.quota_refresh_interval,
    );

    let labels = LabelKeys { gpu_model: settings.gpu_model_label.clone(), gpu_pool: settings.gpu_pool_label.clone() };
    let pipeline = Arc::new(FilterPipeline::new(quota, cluster, labels, settings.debounce));

    let app = router(AppState { pipeline });
    let listener = tokio::net::TcpListener::bind(&settings.address).await?;
    info!(address = %settings.address, "gpu admission extender listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
