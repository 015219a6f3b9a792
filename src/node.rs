use crate::error::{FlowError, Result};
use crate::joins::MultiStreamOp;
use crate::source::DynSource;
use crate::stage::ShuffleSpec;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased partition payload. Concretely always a `Vec<T>` for the
/// element type captured at the fluent call site.
pub type Partition = Box<dyn Any + Send + Sync>;

/// Recover the concrete record vector from a partition payload.
pub(crate) fn take<T: 'static>(part: Partition, site: &'static str) -> Result<Vec<T>> {
    part.downcast::<Vec<T>>()
        .map(|b| *b)
        .map_err(|_| FlowError::TypeMismatch(site))
}

/// The kind of a declared stream operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpKind {
    Map,
    FlatMap,
    Filter,
    Peek,
    Compute,
    Classify,
    PartitionBy,
    ReduceValues,
    AggregateValues,
    Reduce,
    Count,
    Distinct,
    Sorted,
    Max,
    Min,
    Join,
    Union,
    UnionAll,
}

impl OpKind {
    /// Composable record transformations folded into the enclosing stage.
    pub fn is_transformation(self) -> bool {
        matches!(
            self,
            OpKind::Map | OpKind::FlatMap | OpKind::Filter | OpKind::Peek | OpKind::Compute
        )
    }

    /// Operations that close the current stage behind a shuffle boundary.
    pub fn is_shuffle(self) -> bool {
        self.is_repartition() || self.is_global()
    }

    /// Shuffles that redistribute records by key or classifier and therefore
    /// always open a fresh stage.
    pub fn is_repartition(self) -> bool {
        matches!(
            self,
            OpKind::Classify | OpKind::PartitionBy | OpKind::ReduceValues | OpKind::AggregateValues
        )
    }

    /// Whole-stream operations. Directly after a shuffle boundary they
    /// compile to per-partition post-processing of that boundary; elsewhere
    /// they introduce their own shuffle.
    pub fn is_global(self) -> bool {
        matches!(
            self,
            OpKind::Reduce | OpKind::Count | OpKind::Distinct | OpKind::Sorted | OpKind::Max | OpKind::Min
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Map => "map",
            OpKind::FlatMap => "flatMap",
            OpKind::Filter => "filter",
            OpKind::Peek => "peek",
            OpKind::Compute => "compute",
            OpKind::Classify => "classify",
            OpKind::PartitionBy => "partitionBy",
            OpKind::ReduceValues => "reduceValues",
            OpKind::AggregateValues => "aggregateValues",
            OpKind::Reduce => "reduce",
            OpKind::Count => "count",
            OpKind::Distinct => "distinct",
            OpKind::Sorted => "sorted",
            OpKind::Max => "max",
            OpKind::Min => "min",
            OpKind::Join => "join",
            OpKind::Union => "union",
            OpKind::UnionAll => "unionAll",
        };
        f.write_str(name)
    }
}

/// A type-erased, per-partition record transformation. Concrete operation
/// structs capture the element types at the fluent call site and downcast
/// inside `apply`.
pub trait DynOp: Send + Sync {
    fn apply(&self, input: Partition) -> Result<Partition>;
}

/// Two transformations applied in declaration order.
pub(crate) struct ComposedOp(pub Arc<dyn DynOp>, pub Arc<dyn DynOp>);

impl DynOp for ComposedOp {
    fn apply(&self, input: Partition) -> Result<Partition> {
        self.1.apply(self.0.apply(input)?)
    }
}

/// Compose `next` after `prev` (declaration order preserved).
pub(crate) fn compose(prev: Arc<dyn DynOp>, next: Arc<dyn DynOp>) -> Arc<dyn DynOp> {
    Arc::new(ComposedOp(prev, next))
}

/// Reference to the physical input of a leaf stream.
#[derive(Clone)]
pub enum SourceRef {
    /// A source attached directly when the stream was declared.
    Inline(Arc<dyn DynSource>),
    /// A named stream resolved through configuration (`source.<name>`) at
    /// plan-compilation time.
    Named(String),
}

/// One declared operation in a stream graph. Nodes are appended by fluent
/// calls and never mutated afterwards; earlier nodes stay shared between the
/// streams derived from them.
#[derive(Clone)]
pub enum Node {
    Source {
        /// Stream name, used for `source.<name>` / `partitions.<name>` lookups.
        name: String,
        source: SourceRef,
    },
    Transform {
        kind: OpKind,
        op: Arc<dyn DynOp>,
    },
    Shuffle {
        kind: OpKind,
        spec: ShuffleSpec,
        /// Per-partition function applied after the shuffle completes
        /// (e.g. the sort of `sorted`, the fold of `reduce`).
        post: Option<Arc<dyn DynOp>>,
    },
    /// Multi-stream combine (join or union family). A combine is always the
    /// head of its chain: the constituent streams live inside as captured
    /// branch chains.
    Combine(MultiStreamOp),
}

impl Node {
    pub(crate) fn kind_name(&self) -> String {
        match self {
            Node::Source { name, .. } => format!("source '{name}'"),
            Node::Transform { kind, .. } => kind.to_string(),
            Node::Shuffle { kind, .. } => kind.to_string(),
            Node::Combine(op) => op.kind.to_string(),
        }
    }
}
