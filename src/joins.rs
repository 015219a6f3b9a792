//! Multi-stream join and union coordination.
//!
//! A join or union combines independently-declared streams into one combined
//! stream. The constituent streams are captured as branch chains inside a
//! single [`MultiStreamOp`] node; at execution the coordinator folds them in
//! pairwise, left to right.
//!
//! Transformations declared between successive joins are staged as
//! *checkpoint procedures*: each join records how many constituent streams
//! must have been folded in before the pending transformation applies. For
//! example:
//!
//! ```text
//! one.join(&two).filter(p).join(&three)
//! ```
//!
//! runs the filter against the two-stream tuples before the third stream is
//! folded in, not against the final three-tuples. A predicate supplied via
//! [`Joined::on`] is staged through the same mechanism.
//!
//! Cross joins (no predicate) are legal only when every side has a single
//! partition or all sides were explicitly classified to a common partition
//! count; the plan compiler rejects anything else before data flows.

use crate::error::Result;
use crate::flow::{Element, Flow};
use crate::node::{DynOp, Node, OpKind, Partition, compose, take};
use crate::planner::chain_from;
use std::collections::HashSet;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

/// Folds one more stream's partition into the running combined partition.
pub(crate) type FoldFn = Arc<dyn Fn(Partition, Partition) -> Result<Partition> + Send + Sync>;

/// Collapses a branch's task outputs into its single logical partition.
pub(crate) type CoalesceFn = Arc<dyn Fn(Vec<Partition>) -> Result<Partition> + Send + Sync>;

/// A transformation staged between joins: applied to the combined stream once
/// `stream_threshold` constituent streams have been folded in.
#[derive(Clone)]
pub struct CheckpointProcedure {
    pub stream_threshold: usize,
    pub(crate) pending: Option<Arc<dyn DynOp>>,
}

/// One constituent stream of a combine, captured at the fluent call site.
#[derive(Clone)]
pub(crate) struct Branch {
    pub chain: Arc<Vec<Node>>,
    pub coalesce: CoalesceFn,
    pub arity: usize,
    pub partition_count: usize,
    pub classified: bool,
    pub foreign: bool,
}

/// Declaration-side state of a multi-stream combine: captured branches, the
/// pairwise fold functions, and the checkpoint procedures.
#[derive(Clone)]
pub struct MultiStreamOp {
    pub kind: OpKind,
    pub(crate) branches: Vec<Branch>,
    pub(crate) folds: Vec<FoldFn>,
    pub(crate) checkpoints: Vec<CheckpointProcedure>,
    pub(crate) stream_counter: usize,
}

impl MultiStreamOp {
    /// Compose a transformation into the current (last) checkpoint. The new
    /// function wraps the previous one, so declaration order is preserved at
    /// application time.
    pub(crate) fn compose_into_last_checkpoint(&mut self, op: Arc<dyn DynOp>) {
        if let Some(last) = self.checkpoints.last_mut() {
            last.pending = Some(match last.pending.take() {
                Some(prev) => compose(prev, op),
                None => op,
            });
        }
    }
}

/// Walk a captured chain and report the partition profile of its final
/// stage, mirroring how the plan compiler will treat the same nodes.
fn branch_profile(chain: &[Node], default_partitions: usize) -> (usize, bool) {
    let mut profile = (default_partitions, false);
    let mut at_boundary = false;
    for node in chain {
        match node {
            Node::Source { .. } => {}
            Node::Transform { .. } => at_boundary = false,
            Node::Shuffle { kind, spec, post } => {
                if kind.is_global() && at_boundary {
                    at_boundary = false;
                } else {
                    profile = (spec.partition_count, spec.classified);
                    at_boundary = post.is_none();
                }
            }
            Node::Combine(op) => {
                if let Some(first) = op.branches.first() {
                    profile = (first.partition_count, first.classified);
                }
                at_boundary = false;
            }
        }
    }
    profile
}

fn cross_fold<A: Element, B: Element>() -> FoldFn {
    Arc::new(|left, right| {
        let left: Vec<A> = take(left, "join left input")?;
        let right: Vec<B> = take(right, "join right input")?;
        let mut rows = Vec::with_capacity(left.len() * right.len());
        for a in &left {
            for b in &right {
                rows.push((a.clone(), b.clone()));
            }
        }
        Ok(Box::new(rows) as Partition)
    })
}

impl<T: Element> Flow<T> {
    /// Capture this stream's chain as a combine branch.
    pub(crate) fn capture_branch(&self) -> Branch {
        let chain = chain_from(&self.graph, self.id).unwrap_or_default();
        let (partition_count, classified) = branch_profile(&chain, self.default_partitions);
        let coalesce: CoalesceFn = Arc::new(|parts: Vec<Partition>| {
            let mut out: Vec<T> = Vec::new();
            for part in parts {
                out.extend(take::<T>(part, "branch coalesce")?);
            }
            Ok(Box::new(out) as Partition)
        });
        Branch {
            chain: Arc::new(chain),
            coalesce,
            arity: self.arity,
            partition_count,
            classified,
            foreign: false,
        }
    }

    pub(crate) fn start_combine<O, R: Element>(
        &self,
        rhs: &Flow<R>,
        kind: OpKind,
        fold: FoldFn,
    ) -> Flow<O> {
        let lhs_branch = self.capture_branch();
        let mut rhs_branch = rhs.capture_branch();
        rhs_branch.foreign = !self.graph.same_graph(&rhs.graph);
        let stream_counter = lhs_branch.arity + rhs_branch.arity;
        let op = MultiStreamOp {
            kind,
            branches: vec![lhs_branch, rhs_branch],
            folds: vec![fold],
            checkpoints: vec![CheckpointProcedure {
                stream_threshold: stream_counter,
                pending: None,
            }],
            stream_counter,
        };
        let id = self.graph.insert_node(Node::Combine(op));
        self.derived_with_arity(id, stream_counter)
    }

    pub(crate) fn extend_combine<O, R: Element>(&self, rhs: &Flow<R>, fold: FoldFn) -> Flow<O> {
        let Some(Node::Combine(mut op)) = self.graph.node(self.id) else {
            // A joined handle always ends at a combine node; if it does not,
            // fall back to a fresh combine over the whole left chain.
            return self.start_combine(rhs, OpKind::Join, fold);
        };
        let mut rhs_branch = rhs.capture_branch();
        rhs_branch.foreign = !self.graph.same_graph(&rhs.graph);
        op.stream_counter += rhs_branch.arity;
        op.checkpoints.push(CheckpointProcedure {
            stream_threshold: op.stream_counter,
            pending: None,
        });
        op.branches.push(rhs_branch);
        op.folds.push(fold);
        let counter = op.stream_counter;
        let id = self.graph.insert_node(Node::Combine(op));
        self.derived_with_arity(id, counter)
    }

    /// Join this stream with another, producing the stream of pairs. With no
    /// predicate this is the full Cartesian product of the two sides'
    /// records; supply one with [`Joined::on`].
    pub fn join<R: Element>(&self, rhs: &Flow<R>) -> Joined<(T, R)> {
        Joined {
            flow: self.start_combine(rhs, OpKind::Join, cross_fold::<T, R>()),
        }
    }

    /// Set union with another stream of the same type: same-index partitions
    /// are concatenated and deduplicated by equality.
    pub fn union(&self, rhs: &Flow<T>) -> Flow<T>
    where
        T: Eq + Hash,
    {
        let fold: FoldFn = Arc::new(|left, right| {
            let mut rows: Vec<T> = take(left, "union left input")?;
            rows.extend(take::<T>(right, "union right input")?);
            let mut seen = HashSet::with_capacity(rows.len());
            rows.retain(|row| seen.insert(row.clone()));
            Ok(Box::new(rows) as Partition)
        });
        self.add_union(rhs, OpKind::Union, fold)
    }

    /// Concatenating union: same-index partitions from both sides, no
    /// deduplication.
    pub fn union_all(&self, rhs: &Flow<T>) -> Flow<T> {
        let fold: FoldFn = Arc::new(|left, right| {
            let mut rows: Vec<T> = take(left, "unionAll left input")?;
            rows.extend(take::<T>(right, "unionAll right input")?);
            Ok(Box::new(rows) as Partition)
        });
        self.add_union(rhs, OpKind::UnionAll, fold)
    }

    fn add_union(&self, rhs: &Flow<T>, kind: OpKind, fold: FoldFn) -> Flow<T> {
        match self.graph.node(self.id) {
            Some(Node::Combine(op)) if op.kind == kind => self.extend_combine(rhs, fold),
            _ => self.start_combine(rhs, kind, fold),
        }
    }
}

/// The result of a join: a stream of combined tuples that still accepts a
/// join predicate and further joins (flattening the tuple one component at a
/// time). All other stream operations are available through deref.
pub struct Joined<T> {
    pub(crate) flow: Flow<T>,
}

impl<T> Clone for Joined<T> {
    fn clone(&self) -> Self {
        Joined {
            flow: self.flow.clone(),
        }
    }
}

impl<T> Deref for Joined<T> {
    type Target = Flow<T>;

    fn deref(&self) -> &Flow<T> {
        &self.flow
    }
}

impl<T: Element> Joined<T> {
    /// Filter the combined tuples by a join predicate. Staged through the
    /// current checkpoint procedure, so it applies before any further stream
    /// is folded in.
    pub fn on<P>(&self, predicate: P) -> Joined<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Joined {
            flow: self.flow.filter(predicate),
        }
    }

    /// The underlying stream handle.
    pub fn into_flow(self) -> Flow<T> {
        self.flow
    }

    pub fn map<O, F>(&self, f: F) -> Joined<O>
    where
        O: Element,
        F: Fn(&T) -> O + Send + Sync + 'static,
    {
        Joined {
            flow: self.flow.map(f),
        }
    }

    pub fn filter<P>(&self, predicate: P) -> Joined<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Joined {
            flow: self.flow.filter(predicate),
        }
    }

    pub fn flat_map<O, F>(&self, f: F) -> Joined<O>
    where
        O: Element,
        F: Fn(&T) -> Vec<O> + Send + Sync + 'static,
    {
        Joined {
            flow: self.flow.flat_map(f),
        }
    }

    pub fn peek<F>(&self, f: F) -> Joined<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Joined {
            flow: self.flow.peek(f),
        }
    }
}

macro_rules! joined_arity {
    ($($t:ident),+ ; $next:ident) => {
        paste::paste! {
            impl<$($t: Element,)+> Joined<($($t,)+)> {
                /// Fold one more stream into the running join, widening the
                /// combined tuple by one component.
                pub fn join<$next: Element>(&self, rhs: &Flow<$next>) -> Joined<($($t,)+ $next,)> {
                    let fold: FoldFn = Arc::new(|left: Partition, right: Partition| {
                        let left: Vec<($($t,)+)> = take(left, "join left input")?;
                        let right: Vec<$next> = take(right, "join right input")?;
                        let mut rows = Vec::with_capacity(left.len() * right.len());
                        for row in &left {
                            for next in &right {
                                let ($([<$t:lower _part>],)+) = row.clone();
                                rows.push(($([<$t:lower _part>],)+ next.clone()));
                            }
                        }
                        Ok(Box::new(rows) as Partition)
                    });
                    Joined { flow: self.flow.extend_combine(rhs, fold) }
                }
            }
        }
    };
}

joined_arity!(A, B ; C);
joined_arity!(A, B, C ; D);
joined_arity!(A, B, C, D ; E);
joined_arity!(A, B, C, D, E ; F);
