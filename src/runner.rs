//! The local bulk-synchronous execution engine.
//!
//! Emulates a distributed run with a worker-thread pool: every stage submits
//! one task per input split, tasks stream their split through the stage's
//! fused function and write into the stage's shuffle buffer, and the engine
//! blocks on a barrier until all tasks of the stage finish before advancing.
//! No task of stage N+1 ever observes a partial stage-N output.
//!
//! A failing task (an error or a panic inside a user function) fails its
//! stage at the barrier and aborts the whole plan; remaining tasks of the
//! stage are cancelled best-effort. There is no retry and no
//! catch-and-continue anywhere in this engine.

use crate::error::{FlowError, Result};
use crate::node::{DynOp, Partition};
use crate::shuffle::ShuffleBuffer;
use crate::source::Split;
use crate::stage::{CombinePlan, ExecutionPlan, PlanInput, Stage};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, info};

pub struct LocalRunner {
    /// Worker-thread override; `None` uses the pool default.
    pub threads: Option<usize>,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self { threads: None }
    }
}

enum StageInput {
    Splits(Vec<Split>),
    Partitions(Vec<Partition>),
}

impl StageInput {
    fn len(&self) -> usize {
        match self {
            StageInput::Splits(s) => s.len(),
            StageInput::Partitions(p) => p.len(),
        }
    }
}

impl LocalRunner {
    pub fn new(threads: Option<usize>) -> Self {
        Self { threads }
    }

    /// Run every stage of the plan and return the final stage's output, one
    /// ordered record sequence per partition.
    pub fn run(&self, plan: &ExecutionPlan) -> Result<Vec<Partition>> {
        if let Some(threads) = self.threads {
            // ok() to tolerate an already-built pool on repeated runs
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .ok();
        }
        info!(execution = plan.name.as_str(), stages = plan.stage_count(), "executing plan");
        let out = self.run_plan(plan)?;
        debug!(execution = plan.name.as_str(), partitions = out.len(), "plan complete");
        Ok(out)
    }

    fn run_plan(&self, plan: &ExecutionPlan) -> Result<Vec<Partition>> {
        let mut input = match &plan.input {
            PlanInput::Source(source) => StageInput::Splits(source.splits()?),
            PlanInput::Combine(combine) => StageInput::Partitions(self.run_combine(combine)?),
        };

        for (index, stage) in plan.stages.iter().enumerate() {
            debug!(
                execution = plan.name.as_str(),
                stage = index,
                tasks = input.len(),
                shuffled = stage.shuffle.is_some(),
                "superstep"
            );
            input = StageInput::Partitions(run_stage(stage, input)?);
        }

        match input {
            StageInput::Partitions(parts) => Ok(parts),
            StageInput::Splits(splits) => splits.iter().map(Split::open).collect(),
        }
    }

    /// Execute a multi-stream combine: run every branch plan, normalize each
    /// to its logical partition count, then fold branches in pairwise,
    /// applying checkpoint procedures as their stream thresholds are reached.
    fn run_combine(&self, combine: &CombinePlan) -> Result<Vec<Partition>> {
        let mut branch_outputs = Vec::with_capacity(combine.branches.len());
        for branch in &combine.branches {
            let parts = self.run_plan(&branch.plan)?;
            let parts = if branch.partition_count == 1 {
                vec![(branch.coalesce)(parts)?]
            } else if parts.len() == branch.partition_count {
                parts
            } else {
                return Err(FlowError::Build(format!(
                    "branch '{}' produced {} partitions, expected {}",
                    branch.plan.name,
                    parts.len(),
                    branch.partition_count
                )));
            };
            branch_outputs.push(parts);
        }

        let mut outputs = branch_outputs.into_iter();
        let mut acc = outputs
            .next()
            .ok_or_else(|| FlowError::Build("combine requires at least one stream".into()))?;
        let mut folded = combine.branches[0].arity;
        let mut applied = 0;

        for (step, fold) in combine.folds.iter().enumerate() {
            let rhs = outputs
                .next()
                .ok_or_else(|| FlowError::Build("combine fold without a matching stream".into()))?;
            if rhs.len() != acc.len() {
                return Err(FlowError::PartitionMismatch(vec![acc.len(), rhs.len()]));
            }
            acc = acc
                .into_par_iter()
                .zip(rhs.into_par_iter())
                .map(|(left, right)| run_task(|| fold(left, right)))
                .collect::<Result<Vec<_>>>()?;
            folded += combine.branches[step + 1].arity;

            while applied < combine.checkpoints.len()
                && combine.checkpoints[applied].stream_threshold <= folded
            {
                if let Some(op) = &combine.checkpoints[applied].pending {
                    acc = acc
                        .into_par_iter()
                        .map(|part| run_task(|| op.apply(part)))
                        .collect::<Result<Vec<_>>>()?;
                }
                applied += 1;
            }
        }

        Ok(acc)
    }
}

/// Run one stage over its inputs: one task per split, with the stage barrier
/// realized by collecting every task result before returning.
fn run_stage(stage: &Stage, input: StageInput) -> Result<Vec<Partition>> {
    match &stage.shuffle {
        Some(spec) => {
            let buffer = ShuffleBuffer::open(spec);
            match input {
                StageInput::Splits(splits) => splits.into_par_iter().try_for_each(|split| {
                    run_task(|| {
                        let out = apply_ops(&stage.ops, split.open()?)?;
                        (spec.write)(out, &buffer)
                    })
                })?,
                StageInput::Partitions(parts) => parts.into_par_iter().try_for_each(|part| {
                    run_task(|| {
                        let out = apply_ops(&stage.ops, part)?;
                        (spec.write)(out, &buffer)
                    })
                })?,
            }
            buffer.seal(spec)
        }
        // No shuffle: per-partition output order follows per-partition
        // input order.
        None => match input {
            StageInput::Splits(splits) => splits
                .into_par_iter()
                .map(|split| run_task(|| apply_ops(&stage.ops, split.open()?)))
                .collect(),
            StageInput::Partitions(parts) => parts
                .into_par_iter()
                .map(|part| run_task(|| apply_ops(&stage.ops, part)))
                .collect(),
        },
    }
}

fn apply_ops(ops: &[Arc<dyn DynOp>], input: Partition) -> Result<Partition> {
    ops.iter().try_fold(input, |acc, op| op.apply(acc))
}

/// Run a task body, converting panics in user functions into task errors so
/// they reach the stage barrier instead of tearing down the pool.
fn run_task<R>(body: impl FnOnce() -> Result<R>) -> Result<R> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => Err(FlowError::Task(panic_text(payload.as_ref()))),
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
