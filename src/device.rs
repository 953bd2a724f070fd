//! Per-GPU usage counters.
//!
//! A `Device` is request-local: it is built fresh inside a `NodeView` for
//! one admission decision and discarded afterward. There is no removal of
//! reservations; nothing in this system ever "frees" a device, since the
//! next request reconstructs usage from scratch by replaying pod
//! annotations (see `node_view.rs`).

use crate::{Error, Result};

/// A full GPU, in vCore units.
pub const FULL_GPU_CORES: i64 = 100;

/// Usage counters for a single device within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// 0-based index within the node.
    pub index: usize,
    /// Total memory for this device (node memory split evenly across devices).
    pub total_memory: i64,
    /// Used vCores, always within `[0, 100]`.
    pub used_core: i64,
    /// Used memory, always `<= total_memory`.
    pub used_memory: i64,
}

impl Device {
    pub fn new(index: usize, total_memory: i64) -> Self {
        Self { index, total_memory, used_core: 0, used_memory: 0 }
    }

    pub fn allocatable_cores(&self) -> i64 {
        FULL_GPU_CORES - self.used_core
    }

    pub fn allocatable_memory(&self) -> i64 {
        self.total_memory - self.used_memory
    }

    /// A device is *allocatable for* `(cores, memory)` iff both ceilings
    /// have enough headroom.
    pub fn is_allocatable_for(&self, cores: i64, memory: i64) -> bool {
        self.allocatable_cores() >= cores && self.allocatable_memory() >= memory
    }

    /// Reserve `(cores, memory)` on this device, failing with
    /// `Error::Overcommit` if either ceiling would be exceeded. Commutative
    /// over non-overlapping successes: replaying the same set of
    /// reservations in any order yields identical counters, as long as no
    /// individual reservation in the sequence overflows.
    pub fn reserve(&mut self, cores: i64, memory: i64) -> Result<()> {
        if self.used_core + cores > FULL_GPU_CORES {
            return Err(Error::Overcommit(format!(
                "device {} would exceed core ceiling: used {} + requested {} > 100",
                self.index, self.used_core, cores
            )));
        }
        if self.used_memory + memory > self.total_memory {
            return Err(Error::Overcommit(format!(
                "device {} would exceed memory ceiling: used {} + requested {} > {}",
                self.index, self.used_memory, memory, self.total_memory
            )));
        }
        self.used_core += cores;
        self.used_memory += memory;
        Ok(())
    }

    /// Sort key for the allocator's "most-loaded-first" comparator:
    /// `(allocatable_cores, allocatable_memory, index)`, ascending.
    pub fn rank(&self) -> (i64, i64, usize) {
        (self.allocatable_cores(), self.allocatable_memory(), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_accumulates_within_ceilings() {
        let mut d = Device::new(0, 4);
        d.reserve(30, 1).unwrap();
        d.reserve(20, 1).unwrap();
        assert_eq!(d.used_core, 50);
        assert_eq!(d.used_memory, 2);
        assert_eq!(d.allocatable_cores(), 50);
        assert_eq!(d.allocatable_memory(), 2);
    }

    #[test]
    fn reserve_rejects_core_overcommit() {
        let mut d = Device::new(0, 4);
        d.reserve(90, 0).unwrap();
        let err = d.reserve(20, 0).unwrap_err();
        assert!(matches!(err, Error::Overcommit(_)));
        assert_eq!(d.used_core, 90, "failed reservation must not partially apply");
    }

    #[test]
    fn reserve_rejects_memory_overcommit() {
        let mut d = Device::new(0, 4);
        d.reserve(0, 3).unwrap();
        assert!(d.reserve(0, 2).is_err());
        assert_eq!(d.used_memory, 3);
    }

    #[test]
    fn invariant_never_exceeds_full_device() {
        let mut d = Device::new(0, 4);
        for _ in 0..3 {
            let _ = d.reserve(40, 2);
        }
        assert!(d.used_core <= FULL_GPU_CORES);
        assert!(d.used_memory <= d.total_memory);
    }

    #[test]
    fn rank_orders_by_least_allocatable_first() {
        let mut busy = Device::new(0, 4);
        busy.reserve(90, 0).unwrap();
        let idle = Device::new(1, 4);
        assert!(busy.rank() < idle.rank());
    }
}
