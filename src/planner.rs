//! The execution graph builder: compiles a declared node chain into an
//! ordered list of stages separated by shuffle boundaries.
//!
//! The compiler walks nodes in declaration order and:
//!
//! 1. folds composable transformations (map/flatMap/filter/peek/compute)
//!    into the current stage's function, left to right;
//! 2. closes the current stage whenever a repartitioning operation
//!    (classify/partitionBy/reduceValues/aggregateValues) appears, attaching
//!    that operation's shuffle spec — two shuffles back to back therefore
//!    always produce two distinct stages, never a fused one;
//! 3. compiles a global operation (reduce/count/distinct/sorted/max/min)
//!    standing directly on a shuffle boundary into per-partition
//!    post-processing of that boundary; anywhere else the operation opens
//!    its own shuffle and its post-processing leads the next stage;
//! 4. validates multi-stream combines (partition compatibility, graph
//!    membership) before any branch is compiled.
//!
//! Everything here is a build-time concern: an error from this module means
//! execution never started.

use crate::error::{FlowError, Result};
use crate::graph::FlowGraph;
use crate::joins::MultiStreamOp;
use crate::node::{DynOp, Node, OpKind, SourceRef};
use crate::node_id::NodeId;
use crate::stage::{CombinePlan, CompiledBranch, ExecutionPlan, PlanInput, Stage};
use std::sync::Arc;

/// Walk the graph backwards from `terminal` through single-predecessor edges
/// and return the forward (source → terminal) chain.
pub(crate) fn chain_from(graph: &FlowGraph, terminal: NodeId) -> Result<Vec<Node>> {
    let (mut nodes, edges) = graph.snapshot();
    let mut chain = Vec::<Node>::new();
    let mut cur = terminal;
    loop {
        let node = nodes
            .remove(&cur)
            .ok_or_else(|| FlowError::Build(format!("missing node {cur:?}")))?;
        chain.push(node);
        if let Some((from, _)) = edges.iter().find(|(_, to)| *to == cur).copied() {
            cur = from;
        } else {
            break;
        }
    }
    chain.reverse();
    Ok(chain)
}

/// Compile the chain ending at `terminal` into an execution plan.
pub(crate) fn compile(graph: &FlowGraph, terminal: NodeId, name: &str) -> Result<ExecutionPlan> {
    let chain = chain_from(graph, terminal)?;
    compile_chain(graph, chain, name)
}

fn compile_chain(graph: &FlowGraph, chain: Vec<Node>, name: &str) -> Result<ExecutionPlan> {
    let mut nodes = chain.into_iter();

    let input = match nodes.next() {
        Some(Node::Source { source, .. }) => PlanInput::Source(match source {
            SourceRef::Inline(source) => source,
            SourceRef::Named(stream) => graph.resolve_source(&stream)?,
        }),
        Some(Node::Combine(op)) => PlanInput::Combine(compile_combine(graph, op, name)?),
        Some(other) => {
            return Err(FlowError::Build(format!(
                "stream graph must begin with a source, found {}",
                other.kind_name()
            )));
        }
        None => return Err(FlowError::Build("empty stream graph".into())),
    };

    let mut stages: Vec<Stage> = Vec::new();
    let mut current: Vec<Arc<dyn DynOp>> = Vec::new();

    for node in nodes {
        match node {
            Node::Transform { kind, op } => {
                if !kind.is_transformation() {
                    return Err(FlowError::UnsupportedOperation(format!(
                        "{kind} is not a composable transformation"
                    )));
                }
                current.push(op);
            }
            Node::Shuffle { kind, spec, post } => {
                if !kind.is_shuffle() {
                    return Err(FlowError::UnsupportedOperation(format!(
                        "{kind} cannot introduce a shuffle boundary"
                    )));
                }
                let at_boundary =
                    current.is_empty() && stages.last().is_some_and(|s| s.shuffle.is_some());
                if kind.is_global() && at_boundary {
                    // Standing directly on a shuffle boundary: keep the prior
                    // partitioning and run per partition.
                    if let Some(post) = post {
                        current.push(post);
                    }
                } else {
                    stages.push(Stage {
                        ops: std::mem::take(&mut current),
                        shuffle: Some(spec),
                    });
                    if let Some(post) = post {
                        current.push(post);
                    }
                }
            }
            node @ (Node::Source { .. } | Node::Combine(_)) => {
                return Err(FlowError::UnsupportedOperation(format!(
                    "{} cannot appear mid-stream",
                    node.kind_name()
                )));
            }
        }
    }

    stages.push(Stage {
        ops: current,
        shuffle: None,
    });

    Ok(ExecutionPlan {
        name: name.to_string(),
        input,
        stages,
        encoder: None,
    })
}

fn compile_combine(graph: &FlowGraph, op: MultiStreamOp, name: &str) -> Result<CombinePlan> {
    validate_combine(&op)?;

    let mut branches = Vec::with_capacity(op.branches.len());
    for (ordinal, branch) in op.branches.iter().enumerate() {
        if branch.chain.is_empty() {
            return Err(FlowError::Build(
                "combine branch references nodes missing from the graph".into(),
            ));
        }
        let plan = compile_chain(
            graph,
            branch.chain.as_ref().clone(),
            &format!("{name}#{ordinal}"),
        )?;
        branches.push(CompiledBranch {
            plan,
            coalesce: branch.coalesce.clone(),
            arity: branch.arity,
            partition_count: branch.partition_count,
        });
    }

    Ok(CombinePlan {
        branches,
        folds: op.folds.clone(),
        checkpoints: op.checkpoints.clone(),
    })
}

fn validate_combine(op: &MultiStreamOp) -> Result<()> {
    if op.branches.iter().any(|b| b.foreign) {
        return Err(FlowError::Build(
            "streams combined by join/union must originate from the same flow graph".into(),
        ));
    }

    let counts: Vec<usize> = op.branches.iter().map(|b| b.partition_count).collect();
    let first = counts[0];
    if counts.iter().any(|c| *c != first) {
        return Err(FlowError::PartitionMismatch(counts));
    }
    if op.kind == OpKind::Join && first > 1 && op.branches.iter().any(|b| !b.classified) {
        return Err(FlowError::CrossJoinCardinality { partitions: first });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::from_vec;
    use crate::node::Partition;

    struct Identity;
    impl DynOp for Identity {
        fn apply(&self, input: Partition) -> Result<Partition> {
            Ok(input)
        }
    }

    #[test]
    fn shuffle_kind_in_transform_position_is_rejected() {
        let graph = FlowGraph::new();
        let flow = from_vec(&graph, vec![1u32, 2, 3]);
        let id = graph.insert_node(Node::Transform {
            kind: OpKind::ReduceValues,
            op: Arc::new(Identity),
        });
        graph.connect(flow.id, id);

        let err = compile(&graph, id, "bad").unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedOperation(_)));
    }

    #[test]
    fn transform_kind_in_shuffle_position_is_rejected() {
        let graph = FlowGraph::new();
        let flow = from_vec(&graph, vec![1u32, 2, 3]);
        let id = graph.insert_node(Node::Shuffle {
            kind: OpKind::Map,
            spec: crate::shuffle::gather_spec::<u32>(),
            post: None,
        });
        graph.connect(flow.id, id);

        let err = compile(&graph, id, "bad").unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedOperation(_)));
    }

    #[test]
    fn chain_must_begin_with_a_source() {
        let graph = FlowGraph::new();
        let id = graph.insert_node(Node::Transform {
            kind: OpKind::Map,
            op: Arc::new(Identity),
        });
        let err = compile(&graph, id, "bad").unwrap_err();
        assert!(matches!(err, FlowError::Build(_)));
    }
}
