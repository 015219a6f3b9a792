//! The fluent, typed stream handle.
//!
//! A [`Flow<T>`] is a cheap view over a declared position in a
//! [`FlowGraph`]: every fluent call appends a node and returns a new handle,
//! leaving earlier declarations untouched. Nothing runs until a terminal
//! call ([`Flow::execute_as`] or [`Flow::collect`]) compiles the graph into
//! stages and hands it to the graph's execution delegate.
//!
//! Operation types are captured at the call site and erased behind
//! [`DynOp`]/shuffle-spec closures, so the plan compiler and the engines only
//! ever move opaque partitions around.

use crate::delegate::ExecutionFuture;
use crate::error::{FlowError, Result};
use crate::graph::FlowGraph;
use crate::node::{DynOp, Node, OpKind, Partition, SourceRef, take};
use crate::node_id::NodeId;
use crate::planner;
use crate::shuffle::{
    classify_spec, distinct_spec, gather_spec, keyed_gather_spec, keyed_merge_spec,
    raw_partition_spec,
};
use crate::source::{DynSource, VecSource};
use crate::stage::{ExecutionPlan, RecordEncoder, ShuffleSpec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

/// Bound satisfied by every stream element type.
pub trait Element: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}
impl<T> Element for T where T: 'static + Send + Sync + Clone + Serialize + DeserializeOwned {}

/// A typed handle onto a declared stream.
pub struct Flow<T> {
    pub(crate) graph: FlowGraph,
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) default_partitions: usize,
    pub(crate) arity: usize,
    pub(crate) _t: PhantomData<T>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow {
            graph: self.graph.clone(),
            id: self.id,
            name: self.name.clone(),
            default_partitions: self.default_partitions,
            arity: self.arity,
            _t: PhantomData,
        }
    }
}

/// Declare a stream over an in-memory record vector.
pub fn from_vec<T: Element>(graph: &FlowGraph, data: Vec<T>) -> Flow<T> {
    Flow::from_source(graph, "inline", Arc::new(VecSource::new(data)))
}

/* ---------- Composable operation structs (type capture) ---------- */

pub(crate) struct MapOp<I, O, F>(pub F, pub PhantomData<(I, O)>);
impl<I, O, F> DynOp for MapOp<I, O, F>
where
    I: Element,
    O: Element,
    F: 'static + Send + Sync + Fn(&I) -> O,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<I>(input, "map input")?;
        let out: Vec<O> = rows.iter().map(|row| (self.0)(row)).collect();
        Ok(Box::new(out))
    }
}

pub(crate) struct FilterOp<T, P>(pub P, pub PhantomData<T>);
impl<T, P> DynOp for FilterOp<T, P>
where
    T: Element,
    P: 'static + Send + Sync + Fn(&T) -> bool,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<T>(input, "filter input")?;
        let out: Vec<T> = rows.into_iter().filter(|row| (self.0)(row)).collect();
        Ok(Box::new(out))
    }
}

pub(crate) struct FlatMapOp<I, O, F>(pub F, pub PhantomData<(I, O)>);
impl<I, O, F> DynOp for FlatMapOp<I, O, F>
where
    I: Element,
    O: Element,
    F: 'static + Send + Sync + Fn(&I) -> Vec<O>,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<I>(input, "flatMap input")?;
        let mut out: Vec<O> = Vec::new();
        for row in &rows {
            out.extend((self.0)(row));
        }
        Ok(Box::new(out))
    }
}

/// Side-effect-only observer; returns its input untouched.
pub(crate) struct PeekOp<T, F>(pub F, pub PhantomData<T>);
impl<T, F> DynOp for PeekOp<T, F>
where
    T: Element,
    F: 'static + Send + Sync + Fn(&T),
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<T>(input, "peek input")?;
        for row in &rows {
            (self.0)(row);
        }
        Ok(Box::new(rows))
    }
}

/// Whole-partition transformation.
pub(crate) struct ComputeOp<I, O, F>(pub F, pub PhantomData<(I, O)>);
impl<I, O, F> DynOp for ComputeOp<I, O, F>
where
    I: Element,
    O: Element,
    F: 'static + Send + Sync + Fn(Vec<I>) -> Vec<O>,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<I>(input, "compute input")?;
        Ok(Box::new((self.0)(rows)))
    }
}

/* ---------- Per-partition post-processing of global operations ---------- */

struct DistinctPost<T>(PhantomData<T>);
impl<T> DynOp for DistinctPost<T>
where
    T: Element + Eq + Hash,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let mut rows = take::<T>(input, "distinct input")?;
        let mut seen = HashSet::with_capacity(rows.len());
        rows.retain(|row| seen.insert(row.clone()));
        Ok(Box::new(rows))
    }
}

struct SortPost<T, F>(F, PhantomData<T>);
impl<T, F> DynOp for SortPost<T, F>
where
    T: Element,
    F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let mut rows = take::<T>(input, "sorted input")?;
        rows.sort_by(|a, b| (self.0)(a, b));
        Ok(Box::new(rows))
    }
}

struct CountPost<T>(PhantomData<T>);
impl<T: Element> DynOp for CountPost<T> {
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<T>(input, "count input")?;
        Ok(Box::new(vec![rows.len() as u64]))
    }
}

struct FoldPost<T, F>(F, PhantomData<T>);
impl<T, F> DynOp for FoldPost<T, F>
where
    T: Element,
    F: 'static + Send + Sync + Fn(T, T) -> T,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<T>(input, "reduce input")?;
        let out: Vec<T> = rows.into_iter().reduce(|a, b| (self.0)(a, b)).into_iter().collect();
        Ok(Box::new(out))
    }
}

struct ExtremumPost<T, F> {
    cmp: F,
    keep_max: bool,
    _t: PhantomData<T>,
}
impl<T, F> DynOp for ExtremumPost<T, F>
where
    T: Element,
    F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
{
    fn apply(&self, input: Partition) -> Result<Partition> {
        let rows = take::<T>(input, "extremum input")?;
        let out: Vec<T> = rows
            .into_iter()
            .reduce(|a, b| {
                let keep_b = if self.keep_max {
                    (self.cmp)(&a, &b) == Ordering::Less
                } else {
                    (self.cmp)(&a, &b) == Ordering::Greater
                };
                if keep_b { b } else { a }
            })
            .into_iter()
            .collect();
        Ok(Box::new(out))
    }
}

/* ---------- Constructors ---------- */

impl<T: Element> Flow<T> {
    /// Declare a named stream whose physical source is resolved through the
    /// `source.<name>` configuration entry at plan-compilation time. The
    /// name also keys the stream's `partitions.<name>` default.
    pub fn named(graph: &FlowGraph, name: &str) -> Flow<T> {
        let id = graph.insert_node(Node::Source {
            name: name.to_string(),
            source: SourceRef::Named(name.to_string()),
        });
        Self::handle(graph, id, name)
    }

    /// Declare a named stream over an explicit source.
    pub fn from_source(graph: &FlowGraph, name: &str, source: Arc<dyn DynSource>) -> Flow<T> {
        let id = graph.insert_node(Node::Source {
            name: name.to_string(),
            source: SourceRef::Inline(source),
        });
        Self::handle(graph, id, name)
    }

    fn handle(graph: &FlowGraph, id: NodeId, name: &str) -> Flow<T> {
        let default_partitions = graph.config().partitions(name).unwrap_or(1);
        Flow {
            graph: graph.clone(),
            id,
            name: name.to_string(),
            default_partitions,
            arity: 1,
            _t: PhantomData,
        }
    }

    pub(crate) fn derived<O>(&self, id: NodeId) -> Flow<O> {
        self.derived_with_arity(id, self.arity)
    }

    pub(crate) fn derived_with_arity<O>(&self, id: NodeId, arity: usize) -> Flow<O> {
        Flow {
            graph: self.graph.clone(),
            id,
            name: self.name.clone(),
            default_partitions: self.default_partitions,
            arity,
            _t: PhantomData,
        }
    }

    /// Override the default partition count used by subsequent shuffles on
    /// this stream (otherwise taken from `partitions.<name>`, else 1).
    pub fn partitions(&self, n: usize) -> Flow<T> {
        let mut flow = self.clone();
        flow.default_partitions = n.max(1);
        flow
    }

    /// Append a composable transformation. On a freshly-joined stream the
    /// operation is staged into the current checkpoint procedure instead.
    pub(crate) fn append_transform<O>(&self, kind: OpKind, op: Arc<dyn DynOp>) -> Flow<O> {
        if let Some(Node::Combine(mut multi)) = self.graph.node(self.id) {
            multi.compose_into_last_checkpoint(op);
            let id = self.graph.insert_node(Node::Combine(multi));
            self.derived(id)
        } else {
            let id = self.graph.insert_node(Node::Transform { kind, op });
            self.graph.connect(self.id, id);
            self.derived(id)
        }
    }

    fn append_shuffle<O>(
        &self,
        kind: OpKind,
        spec: ShuffleSpec,
        post: Option<Arc<dyn DynOp>>,
    ) -> Flow<O> {
        let id = self.graph.insert_node(Node::Shuffle { kind, spec, post });
        self.graph.connect(self.id, id);
        // A shuffle re-materializes the stream as a single logical stream.
        self.derived_with_arity(id, 1)
    }
}

/* ---------- Composable transformations ---------- */

impl<T: Element> Flow<T> {
    pub fn map<O, F>(&self, f: F) -> Flow<O>
    where
        O: Element,
        F: 'static + Send + Sync + Fn(&T) -> O,
    {
        self.append_transform(OpKind::Map, Arc::new(MapOp::<T, O, F>(f, PhantomData)))
    }

    pub fn filter<P>(&self, predicate: P) -> Flow<T>
    where
        P: 'static + Send + Sync + Fn(&T) -> bool,
    {
        self.append_transform(OpKind::Filter, Arc::new(FilterOp::<T, P>(predicate, PhantomData)))
    }

    pub fn flat_map<O, F>(&self, f: F) -> Flow<O>
    where
        O: Element,
        F: 'static + Send + Sync + Fn(&T) -> Vec<O>,
    {
        self.append_transform(OpKind::FlatMap, Arc::new(FlatMapOp::<T, O, F>(f, PhantomData)))
    }

    /// Observe each record without changing cardinality or values.
    pub fn peek<F>(&self, f: F) -> Flow<T>
    where
        F: 'static + Send + Sync + Fn(&T),
    {
        self.append_transform(OpKind::Peek, Arc::new(PeekOp::<T, F>(f, PhantomData)))
    }

    /// Transform each partition's record sequence as a whole.
    pub fn compute<O, F>(&self, f: F) -> Flow<O>
    where
        O: Element,
        F: 'static + Send + Sync + Fn(Vec<T>) -> Vec<O>,
    {
        self.append_transform(OpKind::Compute, Arc::new(ComputeOp::<T, O, F>(f, PhantomData)))
    }
}

/* ---------- Shuffle-producing operations ---------- */

impl<T: Element> Flow<T> {
    /// Repartition by a classifier: records with equal classifier values
    /// land in the same of `partitions` partitions. Element type preserved.
    pub fn classify<C, F>(&self, classifier: F, partitions: usize) -> Flow<T>
    where
        C: 'static + Send + Sync + Eq + Hash,
        F: 'static + Send + Sync + Fn(&T) -> C,
    {
        self.append_shuffle(
            OpKind::Classify,
            classify_spec::<T, C, F>(partitions.max(1), classifier),
            None,
        )
    }

    /// Repartition by a raw partitioner. The partitioner must return an
    /// index in `[0, partitions)`; anything else fails the stage.
    pub fn partition_by<P>(&self, partitioner: P, partitions: usize) -> Flow<T>
    where
        P: 'static + Send + Sync + Fn(&T) -> usize,
    {
        self.append_shuffle(
            OpKind::PartitionBy,
            raw_partition_spec::<T, P>(partitions.max(1), partitioner),
            None,
        )
    }

    /// Keyed shuffle with a per-key merge. The merge operator must be
    /// commutative and associative; concurrent tasks submit values for the
    /// same key in unspecified order.
    pub fn reduce_values<K, V, KF, VF, M>(&self, key_fn: KF, val_fn: VF, merge: M) -> Flow<(K, V)>
    where
        K: Element + Eq + Hash,
        V: Element,
        KF: 'static + Send + Sync + Fn(&T) -> K,
        VF: 'static + Send + Sync + Fn(&T) -> V,
        M: 'static + Send + Sync + Fn(V, V) -> V,
    {
        self.append_shuffle(
            OpKind::ReduceValues,
            keyed_merge_spec::<T, K, V, KF, VF, M>(self.default_partitions, key_fn, val_fn, merge),
            None,
        )
    }

    /// Keyed shuffle without a merge: values sharing a key accumulate into
    /// a list.
    pub fn aggregate_values<K, V, KF, VF>(&self, key_fn: KF, val_fn: VF) -> Flow<(K, Vec<V>)>
    where
        K: Element + Eq + Hash,
        V: Element,
        KF: 'static + Send + Sync + Fn(&T) -> K,
        VF: 'static + Send + Sync + Fn(&T) -> V,
    {
        self.append_shuffle(
            OpKind::AggregateValues,
            keyed_gather_spec::<T, K, V, KF, VF>(self.default_partitions, key_fn, val_fn),
            None,
        )
    }

    /// Remove duplicate records. Directly after a shuffle boundary this runs
    /// per partition; otherwise it shuffles records by their own value first.
    pub fn distinct(&self) -> Flow<T>
    where
        T: Eq + Hash,
    {
        self.append_shuffle(
            OpKind::Distinct,
            distinct_spec::<T>(self.default_partitions),
            Some(Arc::new(DistinctPost::<T>(PhantomData))),
        )
    }

    /// Sort records by the comparator. Directly after a shuffle boundary
    /// this sorts each partition; otherwise records are gathered into a
    /// single partition first for a total order.
    pub fn sorted<F>(&self, cmp: F) -> Flow<T>
    where
        F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
    {
        self.append_shuffle(
            OpKind::Sorted,
            gather_spec::<T>(),
            Some(Arc::new(SortPost::<T, F>(cmp, PhantomData))),
        )
    }

    /// Count records. Directly after a shuffle boundary this yields one
    /// count per partition; otherwise a single global count.
    pub fn count(&self) -> Flow<u64> {
        self.append_shuffle(
            OpKind::Count,
            gather_spec::<T>(),
            Some(Arc::new(CountPost::<T>(PhantomData))),
        )
    }

    /// Reduce records with a commutative, associative binary operator.
    pub fn reduce<F>(&self, op: F) -> Flow<T>
    where
        F: 'static + Send + Sync + Fn(T, T) -> T,
    {
        self.append_shuffle(
            OpKind::Reduce,
            gather_spec::<T>(),
            Some(Arc::new(FoldPost::<T, F>(op, PhantomData))),
        )
    }

    /// Keep the greatest record under the comparator.
    pub fn max<F>(&self, cmp: F) -> Flow<T>
    where
        F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
    {
        self.append_shuffle(
            OpKind::Max,
            gather_spec::<T>(),
            Some(Arc::new(ExtremumPost { cmp, keep_max: true, _t: PhantomData::<T> })),
        )
    }

    /// Keep the smallest record under the comparator.
    pub fn min<F>(&self, cmp: F) -> Flow<T>
    where
        F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
    {
        self.append_shuffle(
            OpKind::Min,
            gather_spec::<T>(),
            Some(Arc::new(ExtremumPost { cmp, keep_max: false, _t: PhantomData::<T> })),
        )
    }
}

/* ---------- Terminal operations ---------- */

impl<T: Element> Flow<T> {
    /// Compile this stream into an execution plan without running it.
    ///
    /// Useful for handing several plans to one
    /// [`ExecutionDelegate::execute`](crate::delegate::ExecutionDelegate::execute)
    /// call, or for inspecting stage boundaries.
    ///
    /// # Errors
    ///
    /// Any build-time graph error: unsupported operation positions,
    /// unresolvable sources, partition-incompatible joins or unions.
    pub fn build_plan(&self, execution_name: &str) -> Result<ExecutionPlan> {
        let mut plan = planner::compile(&self.graph, self.id, execution_name)?;
        plan.encoder = Some(record_encoder::<T>());
        Ok(plan)
    }

    /// Compile and submit this stream under the given execution name.
    /// Returns a future resolving to one record sequence per partition.
    ///
    /// # Errors
    ///
    /// Build-time graph errors are returned immediately; execution errors
    /// surface from [`FlowFuture::wait`].
    pub fn execute_as(&self, execution_name: &str) -> Result<FlowFuture<T>> {
        let plan = self.build_plan(execution_name)?;
        let delegate = self.graph.delegate();
        let inner = delegate.execute(execution_name, &self.graph.config(), vec![plan]);
        Ok(FlowFuture {
            inner,
            _t: PhantomData,
        })
    }

    /// Execute under the stream's own name and wait for the result.
    pub fn collect(&self) -> Result<Vec<Vec<T>>> {
        let name = self.name.clone();
        self.execute_as(&name)?.wait()
    }
}

fn record_encoder<T: Element>() -> RecordEncoder {
    Arc::new(|part: &Partition| {
        let rows = part
            .downcast_ref::<Vec<T>>()
            .ok_or(FlowError::TypeMismatch("output partition"))?;
        rows.iter()
            .map(|row| serde_json::to_string(row).map_err(FlowError::from))
            .collect()
    })
}

/// Typed view over a pending execution's outcome.
pub struct FlowFuture<T> {
    inner: ExecutionFuture,
    _t: PhantomData<T>,
}

impl<T: Element> FlowFuture<T> {
    /// Block until the run completes. Resolves with the first failure
    /// encountered; no partial results are exposed for a failed graph.
    pub fn wait(self) -> Result<Vec<Vec<T>>> {
        let mut outcomes = self.inner.wait()?;
        if outcomes.len() != 1 {
            return Err(FlowError::Task(format!(
                "expected one graph outcome, got {}",
                outcomes.len()
            )));
        }
        let parts = outcomes.remove(0)?;
        parts
            .into_iter()
            .map(|part| take::<T>(part, "result partition"))
            .collect()
    }
}
