//! Namespace GPU quota store.
//!
//! Periodically refreshed from a configmap; concurrent-safe via a single
//! `parking_lot::Mutex` guarding `{quota, last_synced_revision}`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::device::FULL_GPU_CORES;
use crate::Result;

/// Data key this system looks for inside the quota configmap.
pub const QUOTA_CONFIGMAP_KEY: &str = "gpu_quota";

/// Per-namespace GPU quota: whole-GPU limits by model, and an optional
/// pool allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaRecord {
    /// GPU model -> limit, expressed in whole GPUs.
    #[serde(default)]
    pub limits: HashMap<String, i64>,
    /// Permitted pools; empty means "any pool permitted."
    #[serde(default)]
    pub pools: Vec<String>,
}

impl QuotaRecord {
    /// `limits[model]` converted to vCore units (whole GPUs * 100).
    pub fn limit_vcores(&self, model: &str) -> Option<i64> {
        self.limits.get(model).map(|whole| whole * FULL_GPU_CORES)
    }

    pub fn permits_pool(&self, pool: &str) -> bool {
        self.pools.is_empty() || self.pools.iter().any(|p| p == pool)
    }
}

struct Inner {
    quota: HashMap<String, QuotaRecord>,
    last_synced_revision: String,
    synced: bool,
}

/// Process-wide, lock-guarded quota table with a background refresh loop.
pub struct QuotaStore {
    inner: Mutex<Inner>,
}

impl Default for QuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                quota: HashMap::new(),
                last_synced_revision: String::new(),
                synced: false,
            }),
        }
    }

    /// Look up the quota record for `namespace`. Absent means "no limit."
    pub fn get(&self, namespace: &str) -> Option<QuotaRecord> {
        self.inner.lock().quota.get(namespace).cloned()
    }

    /// Replace the whole table. Skipped by the refresh loop when
    /// `resource_version` matches what is already loaded.
    pub fn set_all(&self, quota: HashMap<String, QuotaRecord>, resource_version: String) {
        let mut inner = self.inner.lock();
        inner.quota = quota;
        inner.last_synced_revision = resource_version;
        inner.synced = true;
    }

    /// True once at least one successful configmap load has occurred
    /// (including a load that found the configmap absent, per §4.4).
    pub fn has_ever_synced(&self) -> bool {
        self.inner.lock().synced
    }

    fn last_synced_revision(&self) -> String {
        self.inner.lock().last_synced_revision.clone()
    }

    /// Perform one refresh attempt against `client` for `(configmap_name,
    /// configmap_namespace)`. Returns `Ok(true)` if the table was updated,
    /// `Ok(false)` if skipped because the resource version is unchanged.
    pub async fn refresh_once(
        &self,
        client: &dyn ClusterClient,
        configmap_name: &str,
        configmap_namespace: &str,
    ) -> Result<bool> {
        match client.get_config_map(configmap_namespace, configmap_name).await {
            Ok(Some(cm)) => {
                if cm.metadata.resource_version == self.last_synced_revision() && self.has_ever_synced() {
                    return Ok(false);
                }
                let quota = match cm.data.get(QUOTA_CONFIGMAP_KEY) {
                    Some(raw) => serde_json::from_str::<HashMap<String, QuotaRecord>>(raw)?,
                    None => HashMap::new(),
                };
                let count = quota.len();
                self.set_all(quota, cm.metadata.resource_version.clone());
                info!(namespaces = count, "quota store refreshed");
                Ok(true)
            }
            Ok(None) => {
                // Configmap not found clears the store but still counts as synced.
                self.set_all(HashMap::new(), String::new());
                info!("quota configmap not found, treating all namespaces as unlimited");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "quota configmap refresh failed, will retry next tick");
                Err(e)
            }
        }
    }

    /// Spawn the background refresh loop, polling every `interval`.
    /// Refresh failures are logged and retried on the next tick; the loop
    /// only exits when the returned `JoinHandle` is aborted.
    pub fn spawn_refresher(
        self: std::sync::Arc<Self>,
        client: std::sync::Arc<dyn ClusterClient>,
        configmap_name: String,
        configmap_namespace: String,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let _ = self.refresh_once(client.as_ref(), &configmap_name, &configmap_namespace).await;
            }
        })
    }
}
