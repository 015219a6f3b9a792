//! Data sources and their division into splits.
//!
//! A source yields an ordered set of [`Split`]s, each opening into one lazy,
//! finite, single-pass record sequence. `splits()` is stable within one
//! execution: repeated calls on the same source instance return the same
//! division of work.

use crate::error::{FlowError, Result};
use crate::node::Partition;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// One unit of parallel input. Opening a split performs the actual read, so
/// any I/O happens inside the task that consumes it; re-invoking `open`
/// restarts the sequence.
#[derive(Clone)]
pub struct Split {
    open: Arc<dyn Fn() -> Result<Partition> + Send + Sync>,
}

impl Split {
    pub fn new(open: impl Fn() -> Result<Partition> + Send + Sync + 'static) -> Self {
        Self { open: Arc::new(open) }
    }

    pub fn open(&self) -> Result<Partition> {
        (self.open)()
    }
}

/// A type-erased data source divisible into splits.
pub trait DynSource: Send + Sync {
    fn splits(&self) -> Result<Vec<Split>>;
}

/// In-memory source over a record vector, divided into contiguous chunks.
pub struct VecSource<T> {
    data: Arc<Vec<T>>,
    splits: usize,
}

impl<T> VecSource<T> {
    /// Chunk count defaults to one split per worker thread, bounded by the
    /// record count.
    pub fn new(data: Vec<T>) -> Self {
        let splits = num_cpus::get().max(1).min(data.len().max(1));
        Self {
            data: Arc::new(data),
            splits,
        }
    }

    pub fn with_splits(data: Vec<T>, splits: usize) -> Self {
        Self {
            data: Arc::new(data),
            splits: splits.max(1),
        }
    }
}

impl<T> DynSource for VecSource<T>
where
    T: 'static + Send + Sync + Clone,
{
    fn splits(&self) -> Result<Vec<Split>> {
        Ok(chunk_ranges(self.data.len(), self.splits)
            .into_iter()
            .map(|(start, end)| {
                let data = Arc::clone(&self.data);
                Split::new(move || Ok(Box::new(data[start..end].to_vec()) as Partition))
            })
            .collect())
    }
}

/// Text-file source producing one `String` record per line.
pub struct LinesSource {
    path: PathBuf,
    splits: usize,
}

impl LinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            splits: num_cpus::get().max(1),
        }
    }

    pub fn with_splits(path: impl Into<PathBuf>, splits: usize) -> Self {
        Self {
            path: path.into(),
            splits: splits.max(1),
        }
    }
}

impl DynSource for LinesSource {
    fn splits(&self) -> Result<Vec<Split>> {
        // The line ranges are fixed here; each split re-reads its own range
        // when opened.
        let text = fs::read_to_string(&self.path)?;
        let total = text.lines().count();
        let path = self.path.clone();
        Ok(chunk_ranges(total, self.splits.min(total.max(1)))
            .into_iter()
            .map(|(start, end)| {
                let path = path.clone();
                Split::new(move || {
                    let text = fs::read_to_string(&path)?;
                    let lines: Vec<String> = text
                        .lines()
                        .skip(start)
                        .take(end - start)
                        .map(str::to_string)
                        .collect();
                    Ok(Box::new(lines) as Partition)
                })
            })
            .collect())
    }
}

/// Divide `len` records into `n` contiguous ranges. Always returns at least
/// one range so an empty source still schedules one task.
fn chunk_ranges(len: usize, n: usize) -> Vec<(usize, usize)> {
    if len == 0 {
        return vec![(0, 0)];
    }
    let n = n.clamp(1, len);
    let chunk = len.div_ceil(n);
    let mut out = Vec::with_capacity(n);
    let mut start = 0;
    while start < len {
        let end = (start + chunk).min(len);
        out.push((start, end));
        start = end;
    }
    out
}

type SourceFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn DynSource>> + Send + Sync>;

/// Maps URI schemes to source constructors. Pluggable implementations are
/// wired through this explicit registry rather than instantiated by name.
#[derive(Clone)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("file", |path| {
            Ok(Arc::new(LinesSource::new(path)) as Arc<dyn DynSource>)
        });
        registry
    }
}

impl SourceRegistry {
    pub fn register(
        &mut self,
        scheme: impl Into<String>,
        factory: impl Fn(&str) -> Result<Arc<dyn DynSource>> + Send + Sync + 'static,
    ) {
        self.factories.insert(scheme.into(), Arc::new(factory));
    }

    /// Resolve `scheme:rest` through the registered factories. A bare path
    /// is treated as a `file` URI.
    pub fn resolve(&self, name: &str, uri: &str) -> Result<Arc<dyn DynSource>> {
        let (scheme, rest) = uri.split_once(':').unwrap_or(("file", uri));
        let factory = self.factories.get(scheme).ok_or_else(|| FlowError::SourceResolution {
            name: name.to_string(),
            reason: format!("no source registered for scheme '{scheme}'"),
        })?;
        factory(rest)
    }
}
