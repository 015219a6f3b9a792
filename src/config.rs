//! Execution configuration consumed by the core as an opaque key/value map.
//!
//! Loading (files, environment, CLI) is a collaborator concern; the core only
//! recognizes three key families:
//!
//! - `source.<stream>` — resolves a declared stream name to a physical source URI.
//! - `output.<execution>` — base path for persisted result partitions.
//! - `partitions.<stream>` — default partition count for the stream's shuffles.

use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct ExecutionConfig {
    values: HashMap<String, String>,
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// URI of the physical source backing stream `name`, if configured.
    pub fn source_uri(&self, name: &str) -> Option<&str> {
        self.get(&format!("source.{name}"))
    }

    /// Base output path for execution `name`, if configured.
    pub fn output_path(&self, name: &str) -> Option<&str> {
        self.get(&format!("output.{name}"))
    }

    /// Default partition count for stream `name`. Unparseable values are
    /// ignored with a warning.
    pub fn partitions(&self, name: &str) -> Option<usize> {
        let raw = self.get(&format!("partitions.{name}"))?;
        match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Some(n),
            _ => {
                warn!(stream = name, value = raw, "ignoring invalid partitions setting");
                None
            }
        }
    }
}

impl FromIterator<(String, String)> for ExecutionConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<HashMap<String, String>> for ExecutionConfig {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys() {
        let mut cfg = ExecutionConfig::new();
        cfg.set("source.wc", "file:/tmp/words.txt")
            .set("output.job", "/tmp/out")
            .set("partitions.wc", "4");

        assert_eq!(cfg.source_uri("wc"), Some("file:/tmp/words.txt"));
        assert_eq!(cfg.output_path("job"), Some("/tmp/out"));
        assert_eq!(cfg.partitions("wc"), Some(4));
        assert_eq!(cfg.partitions("other"), None);
    }

    #[test]
    fn invalid_partition_values_are_ignored() {
        let mut cfg = ExecutionConfig::new();
        cfg.set("partitions.s", "zero");
        assert_eq!(cfg.partitions("s"), None);
        cfg.set("partitions.s", "0");
        assert_eq!(cfg.partitions("s"), None);
    }
}
