//! Persisted output layout.
//!
//! One file per partition, named by partition ordinal under the configured
//! base path (`<output>/0`, `<output>/1`, …). When several graphs share one
//! run, each graph writes under an extra ordinal segment
//! (`<output>/<graph>/<partition>`). Records are encoded as JSON lines by
//! the encoder the typed terminal call attached to the plan.

use crate::error::Result;
use crate::node::Partition;
use crate::stage::RecordEncoder;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub(crate) fn write_partitions(
    base: &Path,
    graph_ordinal: Option<usize>,
    parts: &[Partition],
    encoder: Option<&RecordEncoder>,
) -> Result<()> {
    let Some(encoder) = encoder else {
        warn!(path = %base.display(), "no record encoder attached; skipping persisted output");
        return Ok(());
    };

    let dir = match graph_ordinal {
        Some(ordinal) => base.join(ordinal.to_string()),
        None => base.to_path_buf(),
    };
    fs::create_dir_all(&dir)?;

    for (ordinal, part) in parts.iter().enumerate() {
        let lines = encoder(part)?;
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(dir.join(ordinal.to_string()), body)?;
    }

    debug!(path = %dir.display(), partitions = parts.len(), "wrote result partitions");
    Ok(())
}
