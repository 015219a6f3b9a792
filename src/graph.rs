//! The shared, append-only stream graph.
//!
//! Fluent calls append nodes and edges here; nothing is ever mutated or
//! removed, so every [`Flow`](crate::flow::Flow) handle is a cheap view over
//! structurally shared declarations. The graph also carries the execution
//! configuration, the source registry, and the delegate that will run
//! compiled plans.

use crate::config::ExecutionConfig;
use crate::delegate::{ExecutionDelegate, LocalDelegate};
use crate::error::{FlowError, Result};
use crate::node::Node;
use crate::node_id::NodeId;
use crate::source::{DynSource, SourceRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct FlowGraph {
    pub(crate) inner: Arc<Mutex<GraphInner>>,
}

pub(crate) struct GraphInner {
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<(NodeId, NodeId)>,
    config: ExecutionConfig,
    registry: SourceRegistry,
    delegate: Arc<dyn ExecutionDelegate>,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::with_config(ExecutionConfig::default())
    }
}

impl Clone for FlowGraph {
    fn clone(&self) -> Self {
        FlowGraph {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GraphInner {
                next_id: 0,
                nodes: HashMap::new(),
                edges: Vec::new(),
                config,
                registry: SourceRegistry::default(),
                delegate: Arc::new(LocalDelegate::default()),
            })),
        }
    }

    /// Replace the execution delegate used by terminal calls on this graph.
    pub fn set_delegate(&self, delegate: Arc<dyn ExecutionDelegate>) {
        self.inner.lock().unwrap().delegate = delegate;
    }

    pub(crate) fn delegate(&self) -> Arc<dyn ExecutionDelegate> {
        Arc::clone(&self.inner.lock().unwrap().delegate)
    }

    /// Register a source factory for a URI scheme used in `source.<name>`
    /// configuration values.
    pub fn register_source(
        &self,
        scheme: impl Into<String>,
        factory: impl Fn(&str) -> Result<Arc<dyn DynSource>> + Send + Sync + 'static,
    ) {
        self.inner.lock().unwrap().registry.register(scheme, factory);
    }

    pub fn config(&self) -> ExecutionConfig {
        self.inner.lock().unwrap().config.clone()
    }

    pub(crate) fn insert_node(&self, node: Node) -> NodeId {
        let mut g = self.inner.lock().unwrap();
        let id = NodeId::new(g.next_id);
        g.next_id += 1;
        g.nodes.insert(id, node);
        id
    }

    pub(crate) fn connect(&self, from: NodeId, to: NodeId) {
        let mut g = self.inner.lock().unwrap();
        g.edges.push((from, to));
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.lock().unwrap().nodes.get(&id).cloned()
    }

    pub(crate) fn snapshot(&self) -> (HashMap<NodeId, Node>, Vec<(NodeId, NodeId)>) {
        let g = self.inner.lock().unwrap();
        (g.nodes.clone(), g.edges.clone())
    }

    pub(crate) fn same_graph(&self, other: &FlowGraph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve a named stream to its physical source through configuration
    /// and the registry.
    pub(crate) fn resolve_source(&self, name: &str) -> Result<Arc<dyn DynSource>> {
        let g = self.inner.lock().unwrap();
        let uri = g.config.source_uri(name).ok_or_else(|| FlowError::SourceResolution {
            name: name.to_string(),
            reason: "no source.<name> configuration entry".to_string(),
        })?;
        g.registry.resolve(name, uri)
    }
}
