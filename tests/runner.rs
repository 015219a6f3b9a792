use shardflow::testing::*;
use shardflow::{
    DelegateSession, ExecutionConfig, ExecutionDelegate, ExecutionFuture, FlowError, FlowGraph,
    LocalDelegate, from_vec,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn per_partition_order_is_preserved_without_a_shuffle() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let input: Vec<u32> = (0..1000).collect();

    let out = from_vec(&graph, input.clone())
        .map(|x: &u32| x * 2)
        .filter(|x: &u32| x % 4 == 0)
        .collect()?;

    let expected: Vec<u32> = input.iter().map(|x| x * 2).filter(|x| x % 4 == 0).collect();
    assert_collections_equal(&flatten(out), &expected);
    Ok(())
}

#[test]
fn repeated_runs_are_deterministic() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let flow = from_vec(&graph, (0u32..500).collect())
        .partitions(4)
        .reduce_values(|x: &u32| x % 10, |x| *x as u64, |a, b| a + b);

    let mut first = flatten(flow.collect()?);
    let mut second = flatten(flow.collect()?);
    first.sort();
    second.sort();
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn task_panic_fails_the_stage_and_surfaces_the_cause() {
    let graph = FlowGraph::new();
    let result = from_vec(&graph, (0u32..10).collect())
        .map(|x: &u32| {
            if *x == 5 {
                panic!("boom on 5");
            }
            x * 2
        })
        .collect();

    match result.unwrap_err() {
        FlowError::Task(message) => assert!(message.contains("boom on 5"), "got: {message}"),
        other => panic!("expected a task error, got: {other}"),
    }
}

#[test]
fn panic_inside_a_merge_operator_fails_the_execution() {
    let graph = FlowGraph::new();
    let result = from_vec(&graph, vec![1u64, 1, 1])
        .reduce_values(|_| "k".to_string(), |v| *v, |_, _| panic!("bad merge"))
        .collect();

    assert!(matches!(result.unwrap_err(), FlowError::Task(_)));
}

#[test]
fn one_failing_graph_does_not_poison_the_others() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let good = from_vec(&graph, vec![1u32, 2, 3]).map(|x: &u32| x + 1);
    let bad = from_vec(&graph, vec![1u32]).map(|_: &u32| -> u32 { panic!("doomed") });

    let plans = vec![good.build_plan("good")?, bad.build_plan("bad")?];
    let delegate = LocalDelegate::new();
    let mut outcomes = delegate
        .execute("mixed-run", &ExecutionConfig::new(), plans)
        .wait()?;

    assert_eq!(outcomes.len(), 2);
    let bad_outcome = outcomes.pop().expect("second graph outcome");
    let good_outcome = outcomes.pop().expect("first graph outcome");

    let parts = good_outcome?;
    let rows: Vec<u32> = parts
        .iter()
        .flat_map(|p| p.downcast_ref::<Vec<u32>>().expect("typed partition").clone())
        .collect();
    assert_unordered_equal(&rows, &[2, 3, 4]);

    assert!(matches!(bad_outcome.unwrap_err(), FlowError::Task(_)));
    Ok(())
}

struct CountingDelegate {
    closed: Arc<AtomicUsize>,
}

impl ExecutionDelegate for CountingDelegate {
    fn execute(
        &self,
        _name: &str,
        _config: &ExecutionConfig,
        plans: Vec<shardflow::ExecutionPlan>,
    ) -> ExecutionFuture {
        ExecutionFuture::ready(plans.into_iter().map(|_| Ok(Vec::new())).collect())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn delegate_session_closes_exactly_once() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let closed = Arc::new(AtomicUsize::new(0));

    {
        let session = DelegateSession::new(CountingDelegate {
            closed: Arc::clone(&closed),
        });
        let plan = from_vec(&graph, vec![1u32]).build_plan("noop")?;
        let outcomes = session.execute("noop", &ExecutionConfig::new(), vec![plan]).wait()?;
        assert_eq!(outcomes.len(), 1);
    }
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let closed_explicit = Arc::new(AtomicUsize::new(0));
    let session = DelegateSession::new(CountingDelegate {
        closed: Arc::clone(&closed_explicit),
    });
    session.close();
    assert_eq!(closed_explicit.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn explicit_thread_count_still_yields_correct_results() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    graph.set_delegate(Arc::new(LocalDelegate::with_threads(2)));

    let counts = from_vec(&graph, (0u32..200).collect())
        .partitions(3)
        .reduce_values(|x: &u32| x % 5, |_| 1u64, |a, b| a + b);

    let mut rows = flatten(counts.collect()?);
    rows.sort();
    assert_eq!(rows, vec![(0, 40), (1, 40), (2, 40), (3, 40), (4, 40)]);
    Ok(())
}
