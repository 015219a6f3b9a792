//! The compiled plan data model: shuffle specs, stages, and execution plans.

use crate::error::Result;
use crate::joins::{CheckpointProcedure, CoalesceFn, FoldFn};
use crate::node::{DynOp, Partition};
use crate::shuffle::ShuffleBuffer;
use crate::source::DynSource;
use std::sync::Arc;

/// How one stage redistributes its output across partitions.
///
/// The `open`/`write`/`seal` closures capture the concrete key, value, and
/// record types at the fluent call site; the engine only plumbs type-erased
/// payloads between them.
#[derive(Clone)]
pub struct ShuffleSpec {
    pub partition_count: usize,
    /// Whether the partitioning was explicitly supplied by the caller
    /// (`classify` / `partition_by`) rather than derived from a key hash.
    pub classified: bool,
    /// Produces one fresh, empty buffer slot payload.
    pub(crate) open: Arc<dyn Fn() -> Partition + Send + Sync>,
    /// Routes one task's output records into the shared buffer.
    pub(crate) write: Arc<dyn Fn(Partition, &ShuffleBuffer) -> Result<()> + Send + Sync>,
    /// Converts one frozen buffer slot into the next stage's input partition.
    pub(crate) seal: Arc<dyn Fn(Partition) -> Result<Partition> + Send + Sync>,
}

/// One unit of planned work: a fused per-partition function, optionally
/// terminated by a shuffle boundary. A stage without a shuffle spec keeps its
/// upstream partitioning and per-partition record order.
#[derive(Clone)]
pub struct Stage {
    pub(crate) ops: Vec<Arc<dyn DynOp>>,
    pub(crate) shuffle: Option<ShuffleSpec>,
}

impl Stage {
    pub fn summary(&self) -> StageSummary {
        StageSummary {
            transform_ops: self.ops.len(),
            shuffle: self.shuffle.as_ref().map(|s| ShuffleSummary {
                partitions: s.partition_count,
                classified: s.classified,
            }),
        }
    }
}

/// Introspection view of one stage, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub transform_ops: usize,
    pub shuffle: Option<ShuffleSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleSummary {
    pub partitions: usize,
    pub classified: bool,
}

/// Compiled input of a plan: either a physical source or a multi-stream
/// combine whose branches are themselves compiled plans.
pub(crate) enum PlanInput {
    Source(Arc<dyn DynSource>),
    Combine(CombinePlan),
}

/// Execution-side view of a multi-stream combine.
pub(crate) struct CombinePlan {
    pub branches: Vec<CompiledBranch>,
    pub folds: Vec<FoldFn>,
    pub checkpoints: Vec<CheckpointProcedure>,
}

pub(crate) struct CompiledBranch {
    pub plan: ExecutionPlan,
    pub coalesce: CoalesceFn,
    pub arity: usize,
    pub partition_count: usize,
}

pub(crate) type RecordEncoder = Arc<dyn Fn(&Partition) -> Result<Vec<String>> + Send + Sync>;

/// An ordered list of stages compiled from one declared terminal output.
/// Consumed once by an execution delegate.
pub struct ExecutionPlan {
    pub name: String,
    pub(crate) input: PlanInput,
    pub(crate) stages: Vec<Stage>,
    /// Set by the typed terminal call; renders result records for the
    /// persisted output layout.
    pub(crate) encoder: Option<RecordEncoder>,
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("name", &self.name)
            .field("stages", &self.stage_summaries())
            .field("has_encoder", &self.encoder.is_some())
            .finish()
    }
}

impl ExecutionPlan {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_summaries(&self) -> Vec<StageSummary> {
        self.stages.iter().map(Stage::summary).collect()
    }
}
