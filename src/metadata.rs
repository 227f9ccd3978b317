//! Reads the used segments from metadata storage.
//!
//! Metadata storage is a YAML file that lists all used segments:
//!
//! ```yaml
//! - id:
//!     data-source: wikipedia
//!     interval:
//!       start: 2024-01-01T00:00:00Z
//!       end: 2024-01-02T00:00:00Z
//!     version: v1
//!   size: 1024
//! ```

use crate::{used_segments::UsedSegments, DataSegment};
use eyre::Context;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// Parses a list of segments in the format described in the [module docs](self).
///
/// A file without any content counts as an empty list.
pub fn parse_segments(content: &str) -> eyre::Result<BTreeSet<DataSegment>> {
    if content.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let segments: Vec<DataSegment> =
        serde_yaml::from_str(content).context("failed to parse segment list")?;
    Ok(segments.into_iter().collect())
}

/// Reads a list of segments from the given file.
pub async fn read_segments(path: &Path) -> eyre::Result<BTreeSet<DataSegment>> {
    let content = smol::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read segment list `{}`", path.display()))?;
    parse_segments(&content).with_context(|| format!("invalid segment list `{}`", path.display()))
}

/// Polls the used segments file and keeps the last successfully read snapshot.
#[derive(Debug)]
pub struct UsedSegmentsProvider {
    path: PathBuf,
    snapshot: UsedSegments,
}

impl UsedSegmentsProvider {
    /// Creates a provider for the given file. No snapshot exists before the first
    /// successful [`poll`](Self::poll).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: UsedSegments::Unknown,
        }
    }

    /// The polled file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file again and replaces the snapshot.
    ///
    /// On error the previous snapshot is kept, so a temporarily unreadable file never turns a
    /// populated snapshot into an empty one.
    pub async fn poll(&mut self) -> eyre::Result<()> {
        let segments = read_segments(&self.path).await?;
        log::debug!(
            "Polled {} used segments from `{}`",
            segments.len(),
            self.path.display()
        );
        self.snapshot = UsedSegments::from_set(segments);
        Ok(())
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> UsedSegments {
        self.snapshot.clone()
    }
}
