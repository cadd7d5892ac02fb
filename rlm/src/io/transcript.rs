//! Session transcripts written as pretty JSON.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::SessionRecord;

/// Write the session record tree to `path`, creating parent directories.
pub fn write_transcript(path: &Path, record: &SessionRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create transcript dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(record).context("serialize transcript")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write transcript {}", path.display()))
}

/// Load a transcript written by [`write_transcript`].
pub fn read_transcript(path: &Path) -> Result<SessionRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read transcript {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
