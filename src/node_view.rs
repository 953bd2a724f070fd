//! Request-local reconstruction of a node's GPU usage.
//!
//! `NodeView` has no lifecycle beyond a single admission request: it is
//! built from the current `Node` object plus the pods known to be placed
//! (or predicted-placed) on it, and discarded once the decision is made.
//! The pod annotation layer is the only ledger; there is nothing to load
//! or persist here.

use tracing::warn;

use crate::device::Device;
use crate::types::{Node, Pod};

/// Reconstructed GPU usage for one node, scoped to a single request.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub name: String,
    pub devices: Vec<Device>,
}

impl NodeView {
    /// Build an empty view (no reservations replayed yet) from a node's
    /// declared capacity. Memory is split evenly across devices.
    fn empty(node: &Node) -> Self {
        let device_count = node.device_count();
        let total_memory = node.total_memory();
        let per_device_memory = if device_count > 0 { total_memory / device_count as i64 } else { 0 };
        let devices = (0..device_count).map(|i| Device::new(i, per_device_memory)).collect();
        Self { name: node.name().to_string(), devices }
    }

    /// Build a view for `node`, replaying reservations from every pod in
    /// `neighbors` considered "on" this node (§4.2). `neighbors` may
    /// include the pod currently being admitted if it already carries
    /// predicate annotations; the caller (pipeline) is responsible for
    /// excluding it when that would be wrong for the decision being made.
    pub fn build(node: &Node, neighbors: &[Pod]) -> Self {
        let mut view = Self::empty(node);
        let device_count = view.devices.len();

        for pod in neighbors {
            if !pod.is_on_node(pod.namespace(), view.name.as_str()) {
                continue;
            }
            for (container_index, container) in pod.spec.containers.iter().enumerate() {
                if !container.requests_gpu() {
                    continue;
                }
                let Some(indices) = pod.predicated_indices(pod.namespace(), container_index) else {
                    continue;
                };
                let cores = container.cores();
                let memory = container.memory();
                for idx in indices {
                    if idx >= device_count {
                        warn!(
                            node = %view.name,
                            pod = %pod.name(),
                            index = idx,
                            "out-of-range device index in predicate annotation, discarding"
                        );
                        continue;
                    }
                    let device = &mut view.devices[idx];
                    let (reserve_cores, reserve_memory) = if cores < 100 {
                        (cores, memory)
                    } else {
                        (100, device.total_memory)
                    };
                    if let Err(e) = device.reserve(reserve_cores, reserve_memory) {
                        warn!(
                            node = %view.name,
                            pod = %pod.name(),
                            index = idx,
                            error = %e,
                            "replay overflowed device, dropping reservation"
                        );
                    }
                }
            }
        }

        view
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn has_gpu_capacity(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn available_cores(&self) -> i64 {
        self.devices.iter().map(Device::allocatable_cores).sum()
    }

    pub fn available_memory(&self) -> i64 {
        self.devices.iter().map(Device::allocatable_memory).sum()
    }

    pub fn used_core(&self) -> i64 {
        self.devices.iter().map(|d| d.used_core).sum()
    }

    pub fn used_memory(&self) -> i64 {
        self.devices.iter().map(|d| d.used_memory).sum()
    }

    /// Sort key for the device-filter's node ordering:
    /// `(available_cores, available_memory, name)`, ascending.
    pub fn rank(&self) -> (i64, i64, String) {
        (self.available_cores(), self.available_memory(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Container, Node, NodeStatus, ObjectMeta, Pod, PodPhase, PodSpec, PodStatus, ResourceList};

    fn gpu_node(name: &str, device_count: i64, total_memory: i64) -> Node {
        let mut allocatable = ResourceList::new();
        allocatable.insert("vcuda-core".to_string(), device_count * 100);
        allocatable.insert("vcuda-memory".to_string(), total_memory);
        Node {
            metadata: ObjectMeta { name: name.to_string(), ..Default::default() },
            status: NodeStatus { allocatable },
        }
    }

    fn placed_pod(name: &str, node: &str, reservations: &[(usize, i64, i64, Vec<usize>)]) -> Pod {
        let mut containers = Vec::new();
        let mut annotations = std::collections::HashMap::new();
        for (idx, cores, memory, devices) in reservations {
            let mut resources = ResourceList::new();
            resources.insert("vcuda-core".to_string(), *cores);
            resources.insert("vcuda-memory".to_string(), *memory);
            containers.push(Container { name: format!("c{idx}"), resources });
            let value = devices.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
            annotations.insert(format!("ns/predicate-gpu-idx-{idx}"), value);
        }
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "ns".to_string(),
                annotations,
                ..Default::default()
            },
            spec: PodSpec { node_name: node.to_string(), containers },
            status: PodStatus { phase: PodPhase::Running },
        }
    }

    #[test]
    fn replay_reconstructs_share_mode_usage() {
        let node = gpu_node("node0", 2, 8);
        let pod = placed_pod("a", "node0", &[(0, 10, 1, vec![0]), (1, 10, 1, vec![0])]);
        let view = NodeView::build(&node, std::slice::from_ref(&pod));
        assert_eq!(view.devices[0].used_core, 20);
        assert_eq!(view.devices[0].used_memory, 2);
        assert_eq!(view.devices[1].used_core, 0);
    }

    #[test]
    fn replay_exclusive_mode_charges_full_device_memory() {
        let node = gpu_node("node0", 2, 8);
        let pod = placed_pod("a", "node0", &[(0, 100, 1, vec![0])]);
        let view = NodeView::build(&node, std::slice::from_ref(&pod));
        assert_eq!(view.devices[0].used_core, 100);
        assert_eq!(view.devices[0].used_memory, 4, "exclusive mode reserves full per-device memory, not the request");
    }

    #[test]
    fn replay_discards_out_of_range_index_without_aborting() {
        let node = gpu_node("node0", 2, 8);
        let pod = placed_pod("a", "node0", &[(0, 10, 1, vec![5])]);
        let view = NodeView::build(&node, std::slice::from_ref(&pod));
        assert_eq!(view.used_core(), 0);
    }

    #[test]
    fn pods_not_on_node_are_skipped() {
        let node = gpu_node("node0", 2, 8);
        let pod = placed_pod("a", "node1", &[(0, 10, 1, vec![0])]);
        let view = NodeView::build(&node, std::slice::from_ref(&pod));
        assert_eq!(view.used_core(), 0);
    }

    #[test]
    fn terminal_pods_are_excluded_from_replay() {
        let node = gpu_node("node0", 2, 8);
        let mut pod = placed_pod("a", "node0", &[(0, 10, 1, vec![0])]);
        pod.status.phase = PodPhase::Succeeded;
        let view = NodeView::build(&node, std::slice::from_ref(&pod));
        assert_eq!(view.used_core(), 0);
    }

    #[test]
    fn replay_is_idempotent_across_identical_inputs() {
        let node = gpu_node("node0", 2, 8);
        let pods = vec![
            placed_pod("a", "node0", &[(0, 10, 1, vec![0])]),
            placed_pod("b", "node0", &[(0, 100, 1, vec![1])]),
        ];
        let v1 = NodeView::build(&node, &pods);
        let v2 = NodeView::build(&node, &pods);
        assert_eq!(v1.used_core(), v2.used_core());
        assert_eq!(v1.used_memory(), v2.used_memory());
        for (a, b) in v1.devices.iter().zip(v2.devices.iter()) {
            assert_eq!(a.used_core, b.used_core);
            assert_eq!(a.used_memory, b.used_memory);
        }
    }

    #[test]
    fn aggregate_usage_equals_sum_of_devices() {
        let node = gpu_node("node0", 2, 8);
        let pods = vec![
            placed_pod("a", "node0", &[(0, 10, 1, vec![0])]),
            placed_pod("b", "node0", &[(0, 100, 1, vec![1])]),
        ];
        let view = NodeView::build(&node, &pods);
        let sum_core: i64 = view.devices.iter().map(|d| d.used_core).sum();
        let sum_memory: i64 = view.devices.iter().map(|d| d.used_memory).sum();
        assert_eq!(sum_core, view.used_core());
        assert_eq!(sum_memory, view.used_memory());
    }
}
