//! Fractional and whole-GPU device allocation.
//!
//! Given a request-local `NodeView`, `allocate` picks device indices for
//! every GPU-requesting container of a pod, charges them into the view as
//! it goes (so later containers of the same pod see the updated state),
//! and on overall success returns a patched copy of the pod carrying the
//! placement annotations from §3. There is no rollback on partial
//! failure: the view is request-local and simply discarded.

use chrono::Utc;

use crate::device::FULL_GPU_CORES;
use crate::node_view::NodeView;
use crate::types::Pod;
use crate::{Error, Result};

/// Pick device indices on `view` for a single container's `(cores,
/// memory)` request, charging the reservation into `view` on success.
///
/// Share mode (`cores < 100`): the smallest-available-that-fits device,
/// by the `(allocatable_cores, allocatable_memory, index)` comparator.
/// Exclusive mode (`cores` a multiple of 100, `n = cores / 100`): the
/// first `n` fully-free devices by the same comparator. A request whose
/// core count is `>= 100` but not an exact multiple (e.g. 150) is treated
/// as exclusive with `n = cores / 100`, truncating the remainder. This
/// combination has no well-defined semantics beyond that, but it matches
/// the truncation the replay path performs, so the two stay consistent.
fn allocate_one(view: &mut NodeView, cores: i64, memory: i64) -> Result<Vec<usize>> {
    if cores < FULL_GPU_CORES {
        let mut order: Vec<usize> = (0..view.devices.len()).collect();
        order.sort_by_key(|&i| view.devices[i].rank());
        let chosen = order
            .into_iter()
            .find(|&i| view.devices[i].is_allocatable_for(cores, memory))
            .ok_or_else(|| Error::Unschedulable(format!("no device fits share request ({cores}, {memory})")))?;
        view.devices[chosen].reserve(cores, memory)?;
        return Ok(vec![chosen]);
    }

    let n = (cores / FULL_GPU_CORES).max(1) as usize;
    let mut order: Vec<usize> = (0..view.devices.len()).collect();
    order.sort_by_key(|&i| view.devices[i].rank());
    let free: Vec<usize> = order
        .into_iter()
        .filter(|&i| view.devices[i].allocatable_cores() == FULL_GPU_CORES)
        .take(n)
        .collect();
    if free.len() < n {
        return Err(Error::Unschedulable(format!(
            "exclusive request needs {n} fully-free devices, only {} available",
            free.len()
        )));
    }
    for &i in &free {
        let total_memory = view.devices[i].total_memory;
        view.devices[i].reserve(FULL_GPU_CORES, total_memory)?;
    }
    let mut indices = free;
    indices.sort_unstable();
    Ok(indices)
}

/// Allocate every GPU-requesting container of `pod` onto `view`, charging
/// reservations as it goes. On success, returns a copy of `pod` with
/// placement annotations set per §3; annotation index ordering is
/// ascending by device id. On any container's failure the whole pod
/// allocation fails; the caller discards `view`.
pub fn allocate(view: &mut NodeView, pod: &Pod, node_name: &str) -> Result<Pod> {
    let mut assignments = Vec::new();
    for (container_index, container) in pod.spec.containers.iter().enumerate() {
        if !container.requests_gpu() {
            continue;
        }
        let indices = allocate_one(view, container.cores(), container.memory())?;
        assignments.push((container_index, indices));
    }
    let now_nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    Ok(pod.with_placement(node_name, &assignments, now_nanos))
}
