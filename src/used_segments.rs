//! The authoritative set of segments that should exist somewhere in the cluster.

use crate::{DataSegment, SegmentId};
use std::{collections::BTreeSet, sync::Arc};

/// A frozen snapshot of the used segments.
///
/// The set is populated asynchronously from metadata storage, so "no segments" has two very
/// different meanings: either metadata storage was not read yet, or it was read and really
/// contains no used segment. The two cases are kept apart explicitly instead of overloading
/// an empty set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsedSegments {
    /// Metadata storage was not read successfully yet.
    Unknown,
    /// Metadata storage was read and contains no used segments.
    Empty,
    /// Metadata storage was read and contains the given used segments.
    Populated(Arc<BTreeSet<DataSegment>>),
}

impl UsedSegments {
    /// Creates a known snapshot from the given set.
    ///
    /// Returns [`UsedSegments::Empty`] if the set contains no segments.
    pub fn from_set(segments: BTreeSet<DataSegment>) -> Self {
        if segments.is_empty() {
            Self::Empty
        } else {
            Self::Populated(Arc::new(segments))
        }
    }

    /// Returns `true` if metadata storage was read at least once.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Returns `true` if the given segment is known to be used.
    ///
    /// Always `false` unless the snapshot is populated.
    pub fn contains(&self, id: &SegmentId) -> bool {
        match self {
            Self::Populated(segments) => segments.contains(id),
            Self::Unknown | Self::Empty => false,
        }
    }

    /// The number of used segments; zero unless populated.
    pub fn len(&self) -> usize {
        match self {
            Self::Populated(segments) => segments.len(),
            Self::Unknown | Self::Empty => 0,
        }
    }

    /// Returns `true` unless the snapshot is populated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The used segments in id order, if populated.
    pub fn segments(&self) -> Option<&Arc<BTreeSet<DataSegment>>> {
        match self {
            Self::Populated(segments) => Some(segments),
            Self::Unknown | Self::Empty => None,
        }
    }
}

impl Default for UsedSegments {
    fn default() -> Self {
        Self::Unknown
    }
}

impl FromIterator<DataSegment> for UsedSegments {
    fn from_iter<T: IntoIterator<Item = DataSegment>>(iter: T) -> Self {
        Self::from_set(iter.into_iter().collect())
    }
}
