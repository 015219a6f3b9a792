use shardflow::testing::*;
use shardflow::{Flow, FlowGraph, VecSource, from_vec};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn map_filter_flat_map_chain() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let lines = from_vec(
        &graph,
        vec![
            "The quick brown fox".to_string(),
            "jumps over the lazy dog".to_string(),
        ],
    );

    let words = lines
        .flat_map(|s: &String| s.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>())
        .filter(|w: &String| w.len() >= 4)
        .map(|w: &String| w.to_uppercase());

    let out = flatten(words.collect()?);
    assert_collections_equal(
        &out,
        &[
            "QUICK".to_string(),
            "BROWN".to_string(),
            "JUMPS".to_string(),
            "OVER".to_string(),
            "LAZY".to_string(),
        ],
    );
    Ok(())
}

#[test]
fn word_count_lands_each_word_in_exactly_one_partition() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let counts = from_vec(
        &graph,
        vec!["alpha beta".to_string(), "beta gamma".to_string()],
    )
    .partitions(2)
    .flat_map(|line: &String| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
    .reduce_values(|word: &String| word.clone(), |_| 1u64, |a, b| a + b);

    let parts = counts.collect()?;
    assert_eq!(parts.len(), 2);

    for word in ["alpha", "beta", "gamma"] {
        let holders = parts
            .iter()
            .filter(|p| p.iter().any(|(w, _)| w == word))
            .count();
        assert_eq!(holders, 1, "{word} must land in exactly one partition");
    }

    let all = flatten(parts);
    assert_kv_equal(
        &all,
        &[
            ("alpha".to_string(), 1),
            ("beta".to_string(), 2),
            ("gamma".to_string(), 1),
        ],
    );
    Ok(())
}

#[test]
fn peek_observes_every_record_without_changing_the_stream() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_op = Arc::clone(&seen);

    let out = from_vec(&graph, vec![1u32, 2, 3, 4])
        .peek(move |_| {
            seen_in_op.fetch_add(1, Ordering::Relaxed);
        })
        .collect()?;

    assert_unordered_equal(&flatten(out), &[1, 2, 3, 4]);
    assert_eq!(seen.load(Ordering::Relaxed), 4);
    Ok(())
}

#[test]
fn compute_transforms_a_whole_partition() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let source = Arc::new(VecSource::with_splits(vec![3u32, 1, 2], 1));
    let out = Flow::<u32>::from_source(&graph, "nums", source)
        .compute(|mut part: Vec<u32>| {
            part.reverse();
            part
        })
        .collect()?;

    assert_collections_equal(&flatten(out), &[2, 1, 3]);
    Ok(())
}

#[test]
fn global_aggregates_over_a_plain_stream() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let nums = from_vec(&graph, vec![5u32, 3, 9, 1, 9]);

    let count = flatten(nums.count().collect()?);
    assert_collections_equal(&count, &[5u64]);

    let sum = flatten(nums.reduce(|a, b| a + b).collect()?);
    assert_collections_equal(&sum, &[27]);

    let max = flatten(nums.max(|a, b| a.cmp(b)).collect()?);
    assert_collections_equal(&max, &[9]);

    let min = flatten(nums.min(|a, b| a.cmp(b)).collect()?);
    assert_collections_equal(&min, &[1]);

    let sorted = flatten(nums.sorted(|a, b| a.cmp(b)).collect()?);
    assert_collections_equal(&sorted, &[1, 3, 5, 9, 9]);

    let distinct = flatten(nums.distinct().collect()?);
    assert_unordered_equal(&distinct, &[5, 3, 9, 1]);
    Ok(())
}

#[test]
fn aggregate_values_groups_without_merging() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let grouped = from_vec(
        &graph,
        vec![
            ("a".to_string(), 1u32),
            ("b".to_string(), 2),
            ("a".to_string(), 3),
        ],
    )
    .aggregate_values(|kv| kv.0.clone(), |kv| kv.1);

    let mut all = flatten(grouped.collect()?);
    all.sort_by(|x, y| x.0.cmp(&y.0));
    for (_, values) in &mut all {
        values.sort_unstable();
    }
    assert_eq!(
        all,
        vec![("a".to_string(), vec![1, 3]), ("b".to_string(), vec![2])]
    );
    Ok(())
}

#[test]
fn empty_source_still_runs_to_completion() -> anyhow::Result<()> {
    let graph = FlowGraph::new();
    let empty: Vec<String> = Vec::new();
    let count = flatten(from_vec(&graph, empty).count().collect()?);
    assert_collections_equal(&count, &[0u64]);
    Ok(())
}
