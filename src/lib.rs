//! # Shardflow
//!
//! A **staged dataflow engine** for Rust: a fluent operation graph
//! (map / flatMap / filter / classify / reduce / join / union / sort) is
//! compiled into an execution plan of **stages** separated by **shuffle
//! boundaries**, then run by a bulk-synchronous local backend — or any
//! other backend implementing the [`ExecutionDelegate`] contract.
//!
//! ## Quick Start
//!
//! ```
//! use shardflow::{FlowGraph, from_vec};
//!
//! # fn main() -> shardflow::Result<()> {
//! let graph = FlowGraph::new();
//!
//! let counts = from_vec(&graph, vec![
//!         "alpha beta".to_string(),
//!         "beta gamma".to_string(),
//!     ])
//!     .flat_map(|line: &String| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
//!     .reduce_values(|word: &String| word.clone(), |_| 1u64, |a, b| a + b);
//!
//! // One ordered record sequence per partition.
//! let partitions = counts.execute_as("word-count")?.wait()?;
//! # let _ = partitions;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Flow graph and flows
//!
//! A [`FlowGraph`] is the shared, append-only container for declared
//! operations, plus the execution configuration and delegate. A [`Flow<T>`]
//! is a typed handle onto one position in that graph; every fluent call
//! appends a node and returns a new handle, never mutating earlier ones.
//!
//! ### Stages and shuffles
//!
//! Terminal calls compile the declarations into an [`ExecutionPlan`]:
//! consecutive composable transformations fold into one stage function, and
//! every shuffle-producing operation (classify, reduceValues,
//! aggregateValues, distinct, sorted, count, max, min, reduce) closes the
//! current stage behind a shuffle boundary. A global operation standing
//! directly on a boundary becomes per-partition post-processing of that
//! boundary instead of a new shuffle.
//!
//! ### Joins, unions, and checkpoints
//!
//! [`Flow::join`] combines streams into tuple streams (with an optional
//! predicate via [`Joined::on`]); [`Flow::union`] / [`Flow::union_all`]
//! concatenate same-index partitions. Transformations declared between
//! successive joins are staged as checkpoint procedures and applied to the
//! intermediate tuples before the next stream is folded in.
//!
//! ### Execution
//!
//! The local backend runs each stage's tasks concurrently on a worker pool
//! and barriers between stages; a failing task fails its stage and the whole
//! graph — errors are never swallowed. Swap the backend through
//! [`FlowGraph::set_delegate`]; scope its resources with
//! [`DelegateSession`].
//!
//! ## Configuration
//!
//! The core consumes an opaque key/value [`ExecutionConfig`]:
//!
//! - `source.<stream>` — physical source URI for a stream declared with
//!   [`Flow::named`], resolved through the graph's source registry.
//! - `output.<execution>` — base path for persisted result partitions, one
//!   JSON-lines file per partition named by ordinal.
//! - `partitions.<stream>` — default partition count for the stream's
//!   shuffles.
//!
//! ## Module Overview
//!
//! - [`flow`] — the fluent `Flow` handle and all single-stream operations
//! - [`joins`] — multi-stream joins, unions, and checkpoint procedures
//! - [`planner`] — compilation of node chains into staged plans
//! - [`shuffle`] — partitioners and the concurrent shuffle buffer
//! - [`runner`] — the bulk-synchronous local execution engine
//! - [`delegate`] — the backend contract and the local delegate
//! - [`source`] — sources, splits, and the source registry
//! - [`config`] — the recognized configuration surface
//! - [`testing`] — assertion helpers for pipeline tests

pub mod config;
pub mod delegate;
pub mod error;
pub mod flow;
pub mod graph;
pub mod joins;
pub mod node;
pub mod node_id;
mod output;
pub mod planner;
pub mod runner;
pub mod shuffle;
pub mod source;
pub mod stage;
pub mod testing;

pub use config::ExecutionConfig;
pub use delegate::{DelegateSession, ExecutionDelegate, ExecutionFuture, GraphResult, LocalDelegate};
pub use error::{FlowError, Result};
pub use flow::{Element, Flow, FlowFuture, from_vec};
pub use graph::FlowGraph;
pub use joins::{CheckpointProcedure, Joined, MultiStreamOp};
pub use node::{DynOp, OpKind, Partition};
pub use node_id::NodeId;
pub use runner::LocalRunner;
pub use shuffle::{ShuffleBuffer, default_partition};
pub use source::{DynSource, LinesSource, SourceRegistry, Split, VecSource};
pub use stage::{ExecutionPlan, ShuffleSummary, Stage, StageSummary};
