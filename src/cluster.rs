//! Cluster client facade.
//!
//! The real cluster informer/client is out of scope (§1). This module
//! defines the capability boundary the rest of the crate depends on
//! (`ClusterClient`) plus an in-memory `InformerCache` implementation, a
//! read-mostly map guarded by a single `RwLock`. A production deployment
//! swaps in a real Kubernetes-client-backed implementation without
//! touching the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{ConfigMap, Node, Pod};
use crate::{Error, Result};

/// Classification of a patch failure, used to decide whether to retry
/// (§4.6). Any variant other than `Conflict`/`ServerTimeout` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    Conflict,
    ServerTimeout,
    Terminal,
}

impl PatchError {
    pub fn is_retryable(self) -> bool {
        matches!(self, PatchError::Conflict | PatchError::ServerTimeout)
    }
}

/// Abstraction over list/get/patch of pods, nodes, and configmaps,
/// backed by cached listers in a real deployment.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>>;
    /// List every pod the cache currently holds, across all namespaces.
    /// Replay needs this: a node is shared across namespaces, and the
    /// device filter must see every pod placed on it regardless of which
    /// namespace the admitted pod itself belongs to.
    async fn list_all_pods(&self) -> Result<Vec<Pod>>;
    async fn list_nodes_with_label_selector(&self, selector: &[(String, String)]) -> Result<Vec<Node>>;
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    /// Apply a strategic merge patch of `pod`'s annotations. Returns
    /// `Ok(())` on success, or the classified error on failure so the
    /// caller's retry loop (§4.6) can decide whether to retry.
    async fn patch_pod(&self, pod: &Pod) -> std::result::Result<(), PatchError>;
}

/// In-memory cluster state, standing in for a real informer cache.
/// One `RwLock` per map, short-held critical sections.
pub struct InformerCache {
    pods: RwLock<HashMap<(String, String), Pod>>,
    nodes: RwLock<HashMap<String, Node>>,
    config_maps: RwLock<HashMap<(String, String), ConfigMap>>,
}

impl Default for InformerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InformerCache {
    pub fn new() -> Self {
        Self {
            pods: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            config_maps: RwLock::new(HashMap::new()),
        }
    }

    pub fn put_pod(&self, pod: Pod) {
        let key = (pod.namespace().to_string(), pod.name().to_string());
        self.pods.write().insert(key, pod);
    }

    pub fn put_node(&self, node: Node) {
        self.nodes.write().insert(node.name().to_string(), node);
    }

    pub fn put_config_map(&self, cm: ConfigMap) {
        let key = (cm.metadata.namespace.clone(), cm.metadata.name.clone());
        self.config_maps.write().insert(key, cm);
    }

    /// Apply the patched annotations onto the cached copy of the pod,
    /// simulating the cluster's accepted write. Used by the in-memory
    /// client; a real client instead issues an HTTP PATCH.
    pub fn apply_patch(&self, pod: &Pod) {
        self.put_pod(pod.clone());
    }
}

#[async_trait]
impl ClusterClient for InformerCache {
    async fn list_pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .read()
            .values()
            .filter(|p| p.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.read().values().cloned().collect())
    }

    async fn list_nodes_with_label_selector(&self, selector: &[(String, String)]) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| selector.iter().all(|(k, v)| n.label(k) == Some(v.as_str())))
            .cloned()
            .collect())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self
            .config_maps
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn patch_pod(&self, pod: &Pod) -> std::result::Result<(), PatchError> {
        self.apply_patch(pod);
        Ok(())
    }
}

/// Apply a patch with the bounded retry policy from §4.6: poll at
/// 1-second intervals up to a 10-second ceiling, retrying only on
/// `Conflict`/`ServerTimeout`. Returns `Error::PatchFailed` once the
/// budget is exhausted or a terminal error is seen.
pub async fn patch_with_retry(client: &Arc<dyn ClusterClient>, pod: &Pod) -> Result<()> {
    const CEILING: std::time::Duration = std::time::Duration::from_secs(10);
    const INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

    let start = tokio::time::Instant::now();
    loop {
        match client.patch_pod(pod).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && start.elapsed() < CEILING => {
                tokio::time::sleep(INTERVAL).await;
                continue;
            }
            Err(e) => return Err(Error::PatchFailed(format!("{e:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectMeta, PodSpec, PodStatus};

    fn pod(ns: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta { name: name.to_string(), namespace: ns.to_string(), ..Default::default() },
            spec: PodSpec::default(),
            status: PodStatus::default(),
        }
    }

    #[tokio::test]
    async fn informer_cache_round_trips_pods() {
        let cache = InformerCache::new();
        cache.put_pod(pod("ns", "p1"));
        cache.put_pod(pod("other", "p2"));
        let listed = cache.list_pods_in_namespace("ns").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name(), "p1");
    }

    #[tokio::test]
    async fn patch_with_retry_succeeds_immediately_on_ok() {
        let cache: Arc<dyn ClusterClient> = Arc::new(InformerCache::new());
        let p = pod("ns", "p1");
        patch_with_retry(&cache, &p).await.unwrap();
    }
}
