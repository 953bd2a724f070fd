//! Minimal Kubernetes object model: only the fields this extender reads.
//!
//! These are plain `serde` structs, not generated client bindings. The
//! `ClusterClient` facade (see `cluster.rs`) is the seam where a real
//! Kubernetes client would plug in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Extended-resource name for the vCore request/capacity.
pub const RESOURCE_VCUDA_CORE: &str = "vcuda-core";
/// Extended-resource name for the vCore memory request/capacity.
pub const RESOURCE_VCUDA_MEMORY: &str = "vcuda-memory";

/// `<ns>/predicate-gpu-idx-<i>` prefix, before the container index.
pub const ANNOTATION_GPU_IDX_PREFIX: &str = "predicate-gpu-idx-";
/// `<ns>/predicate-node`.
pub const ANNOTATION_NODE: &str = "predicate-node";
/// `<ns>/predicate-time`.
pub const ANNOTATION_TIME: &str = "predicate-time";
/// `<ns>/gpu-assigned`.
pub const ANNOTATION_ASSIGNED: &str = "gpu-assigned";

fn annotation_key(namespace: &str, suffix: &str) -> String {
    format!("{namespace}/{suffix}")
}

/// Object metadata common to pods, nodes, and configmaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub resource_version: String,
}

/// A resource list as carried on a container spec (`limits`/`requests`).
pub type ResourceList = HashMap<String, i64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub resources: ResourceList,
}

impl Container {
    /// `vcuda-core` request, or 0 if absent.
    pub fn cores(&self) -> i64 {
        self.resources.get(RESOURCE_VCUDA_CORE).copied().unwrap_or(0)
    }

    /// `vcuda-memory` request, or 0 if absent.
    pub fn memory(&self) -> i64 {
        self.resources.get(RESOURCE_VCUDA_MEMORY).copied().unwrap_or(0)
    }

    /// A container *requests GPU* iff `cores > 0 && (cores >= 100 || memory > 0)`.
    pub fn requests_gpu(&self) -> bool {
        let cores = self.cores();
        cores > 0 && (cores >= 100 || self.memory() > 0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Default for PodPhase {
    fn default() -> Self {
        PodPhase::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// A pod *requests GPU* iff at least one container does.
    pub fn requests_gpu(&self) -> bool {
        self.spec.containers.iter().any(Container::requests_gpu)
    }

    /// Total vCore request across all GPU-requesting containers.
    pub fn total_cores(&self) -> i64 {
        self.spec
            .containers
            .iter()
            .filter(|c| c.requests_gpu())
            .map(Container::cores)
            .sum()
    }

    /// A pod is *already-predicated* iff any annotation key carries one of
    /// the three placement-ledger substrings, for this pod's own namespace
    /// or any other (the substring check is namespace-agnostic by design:
    /// the on-node manager and the extender may use different namespace
    /// prefixes across cluster generations).
    pub fn already_predicated(&self) -> bool {
        self.metadata.annotations.keys().any(|k| {
            k.contains(ANNOTATION_ASSIGNED)
                || k.contains(ANNOTATION_TIME)
                || k.contains(ANNOTATION_GPU_IDX_PREFIX)
        })
    }

    /// Read the device indices predicated for container `i` on this pod,
    /// if any. Returns `None` if the annotation is absent.
    pub fn predicated_indices(&self, namespace: &str, container_index: usize) -> Option<Vec<usize>> {
        let key = annotation_key(namespace, &format!("{ANNOTATION_GPU_IDX_PREFIX}{container_index}"));
        let raw = self.metadata.annotations.get(&key)?;
        Some(
            raw.split(',')
                .filter_map(|s| s.trim().parse::<usize>().ok())
                .collect(),
        )
    }

    /// Node this pod is considered "on" for replay purposes: either bound
    /// via `spec.nodeName`, or predicted via the `predicate-node`
    /// annotation while still unbound.
    pub fn placed_node(&self, namespace: &str) -> Option<&str> {
        if !self.spec.node_name.is_empty() {
            return Some(self.spec.node_name.as_str());
        }
        self.metadata
            .annotations
            .get(&annotation_key(namespace, ANNOTATION_NODE))
            .map(String::as_str)
    }

    /// Whether this pod counts as "on" `node_name` for replay/quota
    /// purposes: placed there, and not terminal.
    pub fn is_on_node(&self, namespace: &str, node_name: &str) -> bool {
        self.status.phase != PodPhase::Succeeded
            && self.status.phase != PodPhase::Failed
            && self.placed_node(namespace) == Some(node_name)
    }

    /// Apply the chosen placement annotations, returning a patched copy.
    /// `assignments` maps container index to the ascending device indices
    /// chosen for that container.
    pub fn with_placement(&self, node_name: &str, assignments: &[(usize, Vec<usize>)], now_nanos: i64) -> Pod {
        let mut patched = self.clone();
        let ns = self.namespace().to_string();
        for (container_index, indices) in assignments {
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            let value = sorted.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
            patched.metadata.annotations.insert(
                annotation_key(&ns, &format!("{ANNOTATION_GPU_IDX_PREFIX}{container_index}")),
                value,
            );
        }
        patched
            .metadata
            .annotations
            .insert(annotation_key(&ns, ANNOTATION_NODE), node_name.to_string());
        patched
            .metadata
            .annotations
            .insert(annotation_key(&ns, ANNOTATION_TIME), now_nanos.to_string());
        patched
            .metadata
            .annotations
            .insert(annotation_key(&ns, ANNOTATION_ASSIGNED), "false".to_string());
        patched
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Allocatable resources, including `vcuda-core`/`vcuda-memory` totals.
    #[serde(default)]
    pub allocatable: ResourceList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Total vCore capacity (`device_count * 100`); 0 if the node carries
    /// no GPU capacity at all.
    pub fn total_cores(&self) -> i64 {
        self.status
            .allocatable
            .get(RESOURCE_VCUDA_CORE)
            .copied()
            .unwrap_or(0)
    }

    /// Total memory capacity across all devices.
    pub fn total_memory(&self) -> i64 {
        self.status
            .allocatable
            .get(RESOURCE_VCUDA_MEMORY)
            .copied()
            .unwrap_or(0)
    }

    /// Device count, derived from total vCore capacity (100 per device).
    /// A node whose capacity is not an exact multiple of 100 truncates
    /// down: a fractional leftover device cannot be addressed.
    pub fn device_count(&self) -> usize {
        (self.total_cores() / 100) as usize
    }

    pub fn has_gpu_capacity(&self) -> bool {
        self.device_count() > 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: HashMap<String, String>,
}
