//! The execution delegate contract and the local backend.
//!
//! A delegate is the backend that actually runs compiled plans — the
//! in-process [`LocalDelegate`] here, or a cluster DAG backend implementing
//! the same trait elsewhere. The core never depends on a backend's
//! internals, only on this contract:
//!
//! - [`ExecutionDelegate::execute`] accepts every plan of one run and
//!   returns a promise resolving to one outcome per plan, so independently
//!   declared graphs succeed or fail independently;
//! - [`ExecutionDelegate::close`] releases backend resources, invoked
//!   exactly once when the owning [`DelegateSession`] is dropped.

use crate::config::ExecutionConfig;
use crate::error::{FlowError, Result};
use crate::node::Partition;
use crate::output;
use crate::runner::LocalRunner;
use crate::stage::ExecutionPlan;
use std::ops::Deref;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};

/// Per-graph outcome of a run: the result partitions, or the first failure.
/// A failed graph exposes no partial results.
pub type GraphResult = Result<Vec<Partition>, FlowError>;

/// Promise for one overall run.
pub struct ExecutionFuture {
    rx: mpsc::Receiver<Vec<GraphResult>>,
}

impl ExecutionFuture {
    /// A future that is already resolved. Mainly useful to delegate
    /// implementations and tests.
    pub fn ready(outcomes: Vec<GraphResult>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(outcomes);
        Self { rx }
    }

    pub(crate) fn from_receiver(rx: mpsc::Receiver<Vec<GraphResult>>) -> Self {
        Self { rx }
    }

    /// Block until the run completes and return one outcome per graph.
    pub fn wait(self) -> Result<Vec<GraphResult>> {
        self.rx
            .recv()
            .map_err(|_| FlowError::Task("execution worker disappeared before delivering results".into()))
    }
}

/// Backend contract for running compiled execution plans.
pub trait ExecutionDelegate: Send + Sync {
    /// Run every plan of one named execution against the given
    /// configuration. Returns immediately; results arrive through the
    /// future, one outcome per plan in submission order.
    fn execute(
        &self,
        name: &str,
        config: &ExecutionConfig,
        plans: Vec<ExecutionPlan>,
    ) -> ExecutionFuture;

    /// Release delegate-held resources (connections, staging files).
    fn close(&self) {}
}

/// Scopes a delegate's resources: dropping the session invokes
/// [`ExecutionDelegate::close`] exactly once, success or failure.
pub struct DelegateSession<D: ExecutionDelegate> {
    delegate: D,
}

impl<D: ExecutionDelegate> DelegateSession<D> {
    pub fn new(delegate: D) -> Self {
        Self { delegate }
    }

    /// Explicitly end the session, closing the delegate.
    pub fn close(self) {}
}

impl<D: ExecutionDelegate> Deref for DelegateSession<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.delegate
    }
}

impl<D: ExecutionDelegate> Drop for DelegateSession<D> {
    fn drop(&mut self) {
        self.delegate.close();
    }
}

/// Runs plans in-process on the bulk-synchronous [`LocalRunner`]. When the
/// configuration carries an `output.<execution>` entry, each successful
/// graph's partitions are persisted under that path (with the graph's
/// ordinal as an extra path segment when a run carries several graphs).
#[derive(Default)]
pub struct LocalDelegate {
    pub threads: Option<usize>,
}

impl LocalDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
        }
    }
}

impl ExecutionDelegate for LocalDelegate {
    fn execute(
        &self,
        name: &str,
        config: &ExecutionConfig,
        plans: Vec<ExecutionPlan>,
    ) -> ExecutionFuture {
        let runner = LocalRunner::new(self.threads);
        let config = config.clone();
        let name = name.to_string();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            info!(execution = name.as_str(), graphs = plans.len(), "starting local run");
            let multi = plans.len() > 1;
            let outcomes: Vec<GraphResult> = plans
                .into_iter()
                .enumerate()
                .map(|(ordinal, plan)| {
                    let parts = runner.run(&plan)?;
                    if let Some(base) = config.output_path(&name) {
                        output::write_partitions(
                            Path::new(base),
                            multi.then_some(ordinal),
                            &parts,
                            plan.encoder.as_ref(),
                        )?;
                    }
                    Ok(parts)
                })
                .collect();
            for (ordinal, outcome) in outcomes.iter().enumerate() {
                if let Err(err) = outcome {
                    warn!(execution = name.as_str(), graph = ordinal, error = %err, "graph failed");
                }
            }
            let _ = tx.send(outcomes);
        });

        ExecutionFuture::from_receiver(rx)
    }
}
