//! Request-level orchestration: quota filter -> debounce -> device filter
//! -> annotation write-back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::cluster::{patch_with_retry, ClusterClient};
use crate::device::FULL_GPU_CORES;
use crate::node_view::NodeView;
use crate::quota::QuotaStore;
use crate::types::{Node, Pod};
use crate::{allocator, Error, Result};

/// Labels used to read a node's GPU model/pool (configurable keys, §6).
#[derive(Debug, Clone)]
pub struct LabelKeys {
    pub gpu_model: String,
    pub gpu_pool: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self { gpu_model: "gpu-model".to_string(), gpu_pool: "gpu-pool".to_string() }
    }
}

/// Outcome of running the pipeline for one pod against a candidate list.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Nodes accepted. Per §1, at most one node ever appears here once the
    /// device filter has run; if the pod does not request GPU, all
    /// candidates pass through unchanged.
    pub accepted_nodes: Vec<Node>,
    /// Per-node failure reasons for everything not in `accepted_nodes`.
    pub failed_reasons: HashMap<String, String>,
    /// The patched pod, present only once the device filter has
    /// successfully annotated and written it back.
    pub patched_pod: Option<Pod>,
}

pub struct FilterPipeline {
    quota: Arc<QuotaStore>,
    cluster: Arc<dyn ClusterClient>,
    labels: LabelKeys,
    debounce: Duration,
}

impl FilterPipeline {
    pub fn new(quota: Arc<QuotaStore>, cluster: Arc<dyn ClusterClient>, labels: LabelKeys, debounce: Duration) -> Self {
        Self { quota, cluster, labels, debounce }
    }

    #[instrument(skip(self, candidates), fields(pod = %pod.name(), ns = %pod.namespace()))]
    pub async fn run(&self, pod: &Pod, candidates: Vec<Node>) -> Result<PipelineResult> {
        if !pod.requests_gpu() {
            debug!("pod does not request GPU, passing all nodes through");
            return Ok(PipelineResult { accepted_nodes: candidates, ..Default::default() });
        }

        if !self.quota.has_ever_synced() {
            return Err(Error::NotSynced);
        }

        if pod.already_predicated() {
            info!("pod already predicated, skipping re-evaluation");
            let mut failed = HashMap::new();
            for node in &candidates {
                failed.insert(node.name().to_string(), "pod already predicated".to_string());
            }
            return Ok(PipelineResult { failed_reasons: failed, ..Default::default() });
        }

        let (quota_passed, mut failed) = self.quota_filter(pod, candidates).await?;

        tokio::time::sleep(self.debounce).await;

        let outcome = self.device_filter(pod, quota_passed).await?;
        failed.extend(outcome.failed_reasons);
        Ok(PipelineResult {
            accepted_nodes: outcome.accepted_nodes,
            failed_reasons: failed,
            patched_pod: outcome.patched_pod,
        })
    }

    /// Stage 1 (§4.5): namespace quota by GPU model and pool.
    async fn quota_filter(&self, pod: &Pod, candidates: Vec<Node>) -> Result<(Vec<Node>, HashMap<String, String>)> {
        let mut failed = HashMap::new();

        let Some(record) = self.quota.get(pod.namespace()) else {
            return Ok((candidates, failed));
        };

        let mut accepted_models: Vec<String> = Vec::new();
        for (model, _) in record.limits.iter() {
            let Some(limit_vcores) = record.limit_vcores(model) else { continue };
            let selector = [(self.labels.gpu_model.clone(), model.clone())];
            let model_nodes = self.cluster.list_nodes_with_label_selector(&selector).await?;
            let model_node_names: std::collections::HashSet<&str> =
                model_nodes.iter().map(|n| n.name()).collect();

            let mut used: i64 = 0;
            let running = self.cluster.list_pods_in_namespace(pod.namespace()).await?;
            for running_pod in &running {
                if running_pod.name() == pod.name() {
                    continue;
                }
                use crate::types::PodPhase;
                if running_pod.status.phase == PodPhase::Failed || running_pod.status.phase == PodPhase::Succeeded {
                    continue;
                }
                let Some(node_name) = running_pod.placed_node(pod.namespace()) else { continue };
                if model_node_names.contains(node_name) {
                    used += running_pod.total_cores();
                }
            }
            used += pod.total_cores();

            if used <= limit_vcores {
                accepted_models.push(model.clone());
            }
        }

        if accepted_models.is_empty() && !record.limits.is_empty() {
            for node in &candidates {
                failed.insert(node.name().to_string(), "ExceedsGPUQuota".to_string());
            }
            return Ok((Vec::new(), failed));
        }

        let mut passed = Vec::new();
        for node in candidates {
            let model = node.label(&self.labels.gpu_model);
            let pool = node.label(&self.labels.gpu_pool).unwrap_or_default();
            let model_ok = match model {
                Some(m) => accepted_models.iter().any(|a| a == m),
                None => record.limits.is_empty(),
            };
            let pool_ok = record.permits_pool(pool);
            if model_ok && pool_ok {
                passed.push(node);
            } else {
                failed.insert(node.name().to_string(), "ExceedsGPUQuota".to_string());
            }
        }

        Ok((passed, failed))
    }

    /// Stage 2 (§4.5): build a `NodeView` per candidate, sort by ascending
    /// free capacity, and accept the first node the allocator can satisfy.
    async fn device_filter(&self, pod: &Pod, candidates: Vec<Node>) -> Result<PipelineResult> {
        let mut failed = HashMap::new();
        let mut ranked: Vec<(Node, NodeView)> = Vec::new();
        let neighbors = self.cluster.list_all_pods().await?;

        for node in candidates {
            if !node.has_gpu_capacity() {
                failed.insert(node.name().to_string(), "NodeNotGPU".to_string());
                continue;
            }
            let view = NodeView::build(&node, &neighbors);
            ranked.push((node, view));
        }

        ranked.sort_by(|(_, a), (_, b)| a.rank().cmp(&b.rank()));

        // §4.6/§7: a patch failure is terminal for the whole call, not just
        // the node it happened on. The decision becomes "no node accepted"
        // rather than falling back to the next-ranked candidate.
        let mut accepted: Option<(Node, Pod)> = None;
        let mut patch_failed = false;
        let mut remaining = ranked.into_iter();
        for (node, mut view) in remaining.by_ref() {
            if accepted.is_some() {
                failed.insert(node.name().to_string(), "pod already matched elsewhere".to_string());
                continue;
            }
            match allocator::allocate(&mut view, pod, node.name()) {
                Ok(patched) => match patch_with_retry(&self.cluster, &patched).await {
                    Ok(()) => {
                        info!(node = %node.name(), "pod accepted and patched");
                        accepted = Some((node, patched));
                    }
                    Err(e) => {
                        failed.insert(node.name().to_string(), format!("{e}"));
                        patch_failed = true;
                        break;
                    }
                },
                Err(_) => {
                    failed.insert(node.name().to_string(), "does not fit".to_string());
                }
            }
        }

        if patch_failed {
            for (node, _) in remaining {
                failed.insert(node.name().to_string(), "no node accepted: patch failed on a higher-ranked node".to_string());
            }
            return Ok(PipelineResult { accepted_nodes: vec![], failed_reasons: failed, patched_pod: None });
        }

        match accepted {
            Some((node, patched)) => {
                Ok(PipelineResult { accepted_nodes: vec![node], failed_reasons: failed, patched_pod: Some(patched) })
            }
            None => Ok(PipelineResult { accepted_nodes: vec![], failed_reasons: failed, patched_pod: None }),
        }
    }

    /// Optional secondary priority function (§9): score candidate nodes by
    /// spare GPU capacity so that, across ties left by the filter phase,
    /// the scheduler prefers nodes with the most room left. Returns a
    /// `(node name, score)` pair per node, score in the conventional 0-10
    /// k8s extender priority range.
    pub async fn priorities(&self, pod: &Pod, candidates: Vec<Node>) -> Result<Vec<(String, i64)>> {
        let _ = pod;
        let neighbors = self.cluster.list_all_pods().await?;
        let mut scored = Vec::with_capacity(candidates.len());
        for node in &candidates {
            if !node.has_gpu_capacity() {
                scored.push((node.name().to_string(), 0));
                continue;
            }
            let view = NodeView::build(node, &neighbors);
            let total = (view.device_count() as i64) * FULL_GPU_CORES;
            let score = if total > 0 { (view.available_cores() * 10) / total } else { 0 };
            scored.push((node.name().to_string(), score.clamp(0, 10)));
        }
        Ok(scored)
    }
}
