//! Error taxonomy for graph construction, partitioning, and task execution.
//!
//! Build-time errors ([`FlowError::Build`], [`FlowError::UnsupportedOperation`],
//! the partition-compatibility variants) are produced while compiling a stream
//! graph into stages, before any task is spawned. Everything else surfaces at
//! run time through the stage barrier or the delegate future.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// An operation kind appeared in a position the plan compiler does not
    /// accept (e.g. a join kind outside a combine node).
    #[error("unsupported operation in this position: {0}")]
    UnsupportedOperation(String),

    /// The declared stream graph is structurally invalid.
    #[error("invalid stream graph: {0}")]
    Build(String),

    /// A partitioner produced an index outside `[0, partitions)`.
    #[error("partitioner produced index {index} outside [0, {partitions})")]
    PartitionOutOfRange { index: usize, partitions: usize },

    /// Streams combined by a join or union carry different partition counts.
    #[error("partition counts differ across combined streams: {0:?}")]
    PartitionMismatch(Vec<usize>),

    /// A cross join was attempted over multi-partition streams that were not
    /// explicitly classified to a common partitioning.
    #[error("cross join requires single-partition or co-classified streams (found {partitions} partitions)")]
    CrossJoinCardinality { partitions: usize },

    /// A task raised an error (or panicked) while applying a stage function.
    #[error("task failed: {0}")]
    Task(String),

    /// A named stream could not be resolved to a physical source.
    #[error("source for stream '{name}' could not be resolved: {reason}")]
    SourceResolution { name: String, reason: String },

    /// A type-erased payload did not carry the expected element type.
    #[error("type mismatch in {0}")]
    TypeMismatch(&'static str),

    #[error("failed to encode output record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
