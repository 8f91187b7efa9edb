//! Execution parameters carried by every operator.
//!
//! Parameters are immutable within a node; mode switches rebuild the node
//! chain via `with_params` rather than mutating in place, so a switch
//! applies to every operator already in the pipeline.

/// Execution discipline for a query pipeline.
///
/// Determines how an operator schedules per-item work: strictly one item
/// at a time, cooperatively overlapped inside the operator's own task, or
/// offloaded to the Tokio worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// One item at a time, no overlap, no spawned tasks.
    ///
    /// This is the default mode with the lowest overhead. Work on item
    /// `k + 1` never starts before item `k` was delivered downstream.
    #[default]
    Sequential,

    /// Cooperative overlap on the operator's own task.
    ///
    /// Per-item futures are driven together, so I/O latencies overlap,
    /// but no additional worker threads are involved.
    Concurrent,

    /// Overlap plus worker-pool offload.
    ///
    /// Async stages run as spawned tasks; synchronous stages run on the
    /// blocking pool so CPU-heavy callbacks don't stall the runtime.
    Parallel,
}

impl ExecutionMode {
    /// Whether this mode overlaps work on successive items.
    pub fn is_overlapped(&self) -> bool {
        !matches!(self, ExecutionMode::Sequential)
    }
}

/// Parameters threaded through a pipeline: the mode plus delivery ordering.
///
/// `ordered` forces output order to equal input order even when per-item
/// work overlaps; unordered delivery yields items in completion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecParams {
    /// Scheduling discipline.
    pub mode: ExecutionMode,
    /// Whether output order must equal input order.
    pub ordered: bool,
}

impl ExecParams {
    /// Sequential, ordered parameters (the default).
    pub const fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            ordered: true,
        }
    }

    /// Concurrent, ordered parameters.
    pub const fn concurrent() -> Self {
        Self {
            mode: ExecutionMode::Concurrent,
            ordered: true,
        }
    }

    /// Parallel, ordered parameters.
    pub const fn parallel() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            ordered: true,
        }
    }

    /// Same mode with the ordering flag replaced.
    pub const fn with_ordered(self, ordered: bool) -> Self {
        Self {
            mode: self.mode,
            ordered,
        }
    }
}

impl Default for ExecParams {
    fn default() -> Self {
        Self::sequential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sequential_ordered() {
        let params = ExecParams::default();
        assert_eq!(params.mode, ExecutionMode::Sequential);
        assert!(params.ordered);
    }

    #[test]
    fn test_with_ordered_keeps_mode() {
        let params = ExecParams::parallel().with_ordered(false);
        assert_eq!(params.mode, ExecutionMode::Parallel);
        assert!(!params.ordered);
    }
}
