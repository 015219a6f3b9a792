use shardflow::testing::*;
use shardflow::{FlowError, FlowGraph, from_vec};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn cross_join_of_single_partition_streams() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let one = from_vec(&graph, vec!["1 A".to_string()]);
    let two = from_vec(&graph, vec!["A 1".to_string()]);

    let parts = one.join(&two).collect()?;
    assert_eq!(parts.len(), 1);
    assert_collections_equal(&parts[0], &[("1 A".to_string(), "A 1".to_string())]);
    Ok(())
}

#[test]
fn cross_join_of_multi_partition_unclassified_streams_fails_fast() {
    let graph = FlowGraph::new();
    let one = from_vec(&graph, vec!["a".to_string(), "b".to_string()]).partitions(2);
    let two = from_vec(&graph, vec!["c".to_string(), "d".to_string()]).partitions(2);

    let err = one.join(&two).build_plan("mismatch").unwrap_err();
    assert!(matches!(err, FlowError::CrossJoinCardinality { partitions: 2 }));
}

#[test]
fn join_of_differently_partitioned_streams_fails_fast() {
    let graph = FlowGraph::new();
    let one = from_vec(&graph, vec![1u32]).partitions(2);
    let two = from_vec(&graph, vec![2u32]).partitions(3);

    let err = one.join(&two).build_plan("mismatch").unwrap_err();
    assert!(matches!(err, FlowError::PartitionMismatch(counts) if counts == vec![2, 3]));
}

#[test]
fn predicated_join_of_co_classified_streams() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let left = from_vec(
        &graph,
        vec!["apple".to_string(), "banana".to_string(), "avocado".to_string()],
    )
    .classify(|w: &String| w.chars().next().unwrap_or('_'), 2);
    let right = from_vec(&graph, vec!["apple".to_string(), "cherry".to_string()])
        .classify(|w: &String| w.chars().next().unwrap_or('_'), 2);

    let joined = left.join(&right).on(|(a, b): &(String, String)| a == b);
    let rows = flatten(joined.collect()?);
    assert_collections_equal(&rows, &[("apple".to_string(), "apple".to_string())]);
    Ok(())
}

#[test]
fn checkpoint_applies_between_joins_not_after() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let one = from_vec(&graph, vec![1u32, 2]);
    let two = from_vec(&graph, vec![10u32, 20]);
    let three = from_vec(&graph, vec!["x".to_string(), "y".to_string()]);

    let evaluated = Arc::new(AtomicUsize::new(0));
    let evaluated_in_op = Arc::clone(&evaluated);

    let triples = one
        .join(&two)
        .filter(move |(a, _b): &(u32, u32)| {
            evaluated_in_op.fetch_add(1, Ordering::Relaxed);
            *a == 1
        })
        .join(&three);

    let rows = flatten(triples.collect()?);

    // The filter saw the 2x2 pairs, not the widened 3-tuples.
    assert_eq!(evaluated.load(Ordering::Relaxed), 4);
    assert_unordered_equal(
        &rows,
        &[
            (1, 10, "x".to_string()),
            (1, 10, "y".to_string()),
            (1, 20, "x".to_string()),
            (1, 20, "y".to_string()),
        ],
    );
    Ok(())
}

#[test]
fn four_way_join_widens_the_tuple() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let a = from_vec(&graph, vec![1u32]);
    let b = from_vec(&graph, vec![2u32]);
    let c = from_vec(&graph, vec![3u32]);
    let d = from_vec(&graph, vec![4u32]);

    let rows = flatten(a.join(&b).join(&c).join(&d).collect()?);
    assert_collections_equal(&rows, &[(1, 2, 3, 4)]);
    Ok(())
}

#[test]
fn join_result_feeds_further_shuffles() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let left = from_vec(&graph, vec!["a".to_string(), "b".to_string()]);
    let right = from_vec(&graph, vec![1u32, 2]);

    let counted = left
        .join(&right)
        .map(|(w, n): &(String, u32)| format!("{w}{n}"))
        .count();

    let rows = flatten(counted.collect()?);
    assert_collections_equal(&rows, &[4u64]);
    Ok(())
}

#[test]
fn union_deduplicates_and_union_all_concatenates() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let a = from_vec(&graph, vec![1u32, 2, 2, 3]);
    let b = from_vec(&graph, vec![3u32, 4]);

    let set = flatten(a.union(&b).collect()?);
    assert_unordered_equal(&set, &[1, 2, 3, 4]);

    let all = flatten(a.union_all(&b).collect()?);
    assert_unordered_equal(&all, &[1, 2, 2, 3, 3, 4]);
    Ok(())
}

#[test]
fn chained_unions_stay_flat() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let a = from_vec(&graph, vec![1u32]);
    let b = from_vec(&graph, vec![2u32]);
    let c = from_vec(&graph, vec![2u32, 3]);

    let rows = flatten(a.union(&b).union(&c).collect()?);
    assert_unordered_equal(&rows, &[1, 2, 3]);
    Ok(())
}

#[test]
fn union_of_differently_partitioned_streams_fails_fast() {
    let graph = FlowGraph::new();
    let a = from_vec(&graph, vec![1u32]).partitions(2);
    let b = from_vec(&graph, vec![2u32]);

    let err = a.union(&b).build_plan("bad-union").unwrap_err();
    assert!(matches!(err, FlowError::PartitionMismatch(_)));
}

#[test]
fn transformation_after_union_applies_to_the_united_stream() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let a = from_vec(&graph, vec![1u32, 2]);
    let b = from_vec(&graph, vec![3u32]);

    let rows = flatten(a.union_all(&b).map(|x: &u32| x * 10).collect()?);
    assert_unordered_equal(&rows, &[10, 20, 30]);
    Ok(())
}

#[test]
fn joining_streams_from_different_graphs_fails_fast() {
    let graph_a = FlowGraph::new();
    let graph_b = FlowGraph::new();
    let a = from_vec(&graph_a, vec![1u32]);
    let b = from_vec(&graph_b, vec![2u32]);

    let err = a.join(&b).build_plan("cross-graph").unwrap_err();
    assert!(matches!(err, FlowError::Build(_)));
}
