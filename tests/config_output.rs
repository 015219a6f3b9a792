use shardflow::testing::*;
use shardflow::{
    ExecutionConfig, ExecutionDelegate, Flow, FlowGraph, LocalDelegate, VecSource, from_vec,
};
use std::fs;
use std::sync::Arc;

#[test]
fn named_stream_resolves_through_configuration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("words.txt");
    fs::write(&path, "alpha beta\nbeta gamma\n")?;

    let mut config = ExecutionConfig::new();
    config.set("source.wc", format!("file:{}", path.display()));
    let graph = FlowGraph::with_config(config);

    let counts = Flow::<String>::named(&graph, "wc")
        .flat_map(|line: &String| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .reduce_values(|w: &String| w.clone(), |_| 1u64, |a, b| a + b);

    let rows = flatten(counts.collect()?);
    assert_kv_equal(
        &rows,
        &[
            ("alpha".to_string(), 1),
            ("beta".to_string(), 2),
            ("gamma".to_string(), 1),
        ],
    );
    Ok(())
}

#[test]
fn registered_scheme_backs_a_named_stream() -> anyhow::Result<()> {
    let mut config = ExecutionConfig::new();
    config.set("source.nums", "mem:0..5");
    let graph = FlowGraph::with_config(config);
    graph.register_source("mem", |range| {
        let (start, end) = range.split_once("..").unwrap_or(("0", "0"));
        let start: u32 = start.parse().unwrap_or(0);
        let end: u32 = end.parse().unwrap_or(0);
        Ok(Arc::new(VecSource::new((start..end).collect())))
    });

    let rows = flatten(Flow::<u32>::named(&graph, "nums").collect()?);
    assert_collections_equal(&rows, &[0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn partitions_config_sets_the_default_partition_count() -> anyhow::Result<()> {
    let mut config = ExecutionConfig::new();
    config.set("partitions.sales", "3");
    let graph = FlowGraph::with_config(config);

    let flow = Flow::<u32>::from_source(
        &graph,
        "sales",
        Arc::new(VecSource::new((0u32..30).collect())),
    )
    .reduce_values(|x: &u32| x % 6, |_| 1u64, |a, b| a + b);

    let parts = flow.collect()?;
    assert_eq!(parts.len(), 3);
    let mut rows = flatten(parts);
    rows.sort();
    assert_eq!(rows.len(), 6);
    assert_all(&rows, |(_, count)| *count == 5);
    Ok(())
}

#[test]
fn output_partitions_are_persisted_by_ordinal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("wordcount");

    let mut config = ExecutionConfig::new();
    config.set("output.wordcount", out.display().to_string());
    let graph = FlowGraph::with_config(config);

    let counts = from_vec(&graph, vec!["a b".to_string(), "b c".to_string()])
        .partitions(2)
        .flat_map(|l: &String| l.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .reduce_values(|w: &String| w.clone(), |_| 1u64, |a, b| a + b);

    counts.execute_as("wordcount")?.wait()?;

    let mut persisted: Vec<(String, u64)> = Vec::new();
    for ordinal in 0..2 {
        let body = fs::read_to_string(out.join(ordinal.to_string()))?;
        for line in body.lines() {
            persisted.push(serde_json::from_str(line)?);
        }
    }
    assert_kv_equal(
        &persisted,
        &[
            ("a".to_string(), 1),
            ("b".to_string(), 2),
            ("c".to_string(), 1),
        ],
    );
    Ok(())
}

#[test]
fn grouped_graphs_write_under_ordinal_directories() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("grouped");

    let mut config = ExecutionConfig::new();
    config.set("output.grouped", out.display().to_string());
    let graph = FlowGraph::with_config(config.clone());

    let first = Flow::<u32>::from_source(
        &graph,
        "nums",
        Arc::new(VecSource::with_splits(vec![1u32, 2], 1)),
    )
    .build_plan("grouped")?;
    let second = from_vec(&graph, vec!["x".to_string()]).build_plan("grouped")?;

    let delegate = LocalDelegate::new();
    let outcomes = delegate.execute("grouped", &config, vec![first, second]).wait()?;
    assert!(outcomes.iter().all(Result::is_ok));

    let nums: Vec<u32> = fs::read_to_string(out.join("0").join("0"))?
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_unordered_equal(&nums, &[1, 2]);

    let words: Vec<String> = fs::read_to_string(out.join("1").join("0"))?
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_collections_equal(&words, &["x".to_string()]);
    Ok(())
}
