//! Wave scheduler: depth assignment and worker distribution
//!
//! Every operation gets a depth equal to the length of its longest
//! dependency chain down to a leaf. Operations sharing a depth form a wave
//! and are mutually independent, so a wave can be distributed across
//! workers freely; between waves a barrier establishes ordering. Wave zero
//! holds the leaves (network inputs, bias tails, regularisation nodes), the
//! highest wave holds the objectives.

use crate::graph::{OpTag, OperationGraph};

/// Wave decomposition of an operation graph
#[derive(Debug, Clone)]
pub struct WavePlan {
    waves: Vec<Vec<u32>>,
    worker_count: usize,
}

impl WavePlan {
    /// Compute the wave matrix of a graph
    pub fn new(graph: &OperationGraph) -> Self {
        let operations = graph.operations();
        let mut depth = vec![0u32; operations.len()];

        // relax depths until fixpoint; terminates because ordering
        // dependencies form a DAG
        loop {
            let mut modified = false;
            for (index, op) in operations.iter().enumerate() {
                for dependency in op.ordering_dependencies() {
                    if depth[index] <= depth[dependency as usize] {
                        depth[index] = depth[dependency as usize] + 1;
                        modified = true;
                    }
                }
            }
            if !modified {
                break;
            }
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<u32>> = vec![Vec::new(); max_depth as usize + 1];
        for (index, &d) in depth.iter().enumerate() {
            waves[d as usize].push(index as u32);
        }

        let worker_count = ((operations.len() as f64) / (waves.len() as f64)).ceil() as usize;
        log::debug!(
            "wave plan: {} waves over {} operations, {} worker slots",
            waves.len(),
            operations.len(),
            worker_count.max(1)
        );
        Self {
            waves,
            worker_count: worker_count.max(1),
        }
    }

    /// The wave matrix: operation indices grouped by depth, leaves first
    pub fn waves(&self) -> &[Vec<u32>] {
        &self.waves
    }

    /// Number of worker slots each wave is distributed across
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Depth of one operation
    pub fn depth_of(&self, operation_index: u32) -> Option<u32> {
        self.waves
            .iter()
            .position(|wave| wave.contains(&operation_index))
            .map(|depth| depth as u32)
    }

    /// Packs of one wave: at most `worker_count` operations run
    /// concurrently, wider waves iterate with a barrier between packs
    pub fn packs<'a>(&'a self, wave: &'a [u32]) -> impl Iterator<Item = &'a [u32]> {
        wave.chunks(self.worker_count)
    }

    /// Forward execution order: waves leaves-first, packs in wave order
    ///
    /// Feature operations that want the whole wave to themselves (multi
    /// worker operations) keep their position; the kernel emitter pulls
    /// them out of the worker switch separately.
    pub fn forward_order(&self) -> Vec<u32> {
        self.waves.iter().flatten().copied().collect()
    }

    /// Whether an operation runs outside the per-worker switch
    pub fn is_multi_worker(graph: &OperationGraph, operation_index: u32) -> bool {
        graph.operations()[operation_index as usize].tag() == OpTag::SolutionFeature
    }
}
