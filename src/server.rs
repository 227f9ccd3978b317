//! Point-in-time views of the servers of the cluster and the segments they hold.

use crate::{DataSegment, SegmentId};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

/// The role of a segment-holding server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    /// Serves segments from its local segment cache.
    Historical,
    /// Serves segments on behalf of another cluster.
    Bridge,
}

impl Default for ServerType {
    fn default() -> Self {
        Self::Historical
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Historical => write!(f, "historical"),
            Self::Bridge => write!(f, "bridge"),
        }
    }
}

/// The segments of one data source that a server holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SerializedDataSource", into = "SerializedDataSource")]
pub struct ImmutableDataSource {
    name: Arc<str>,
    segments: BTreeMap<SegmentId, DataSegment>,
}

/// Wire form of [`ImmutableDataSource`]; JSON maps only support string keys.
#[derive(Serialize, Deserialize)]
struct SerializedDataSource {
    name: Arc<str>,
    segments: Vec<DataSegment>,
}

impl From<SerializedDataSource> for ImmutableDataSource {
    fn from(serialized: SerializedDataSource) -> Self {
        Self {
            name: serialized.name,
            segments: serialized
                .segments
                .into_iter()
                .map(|segment| (segment.id().clone(), segment))
                .collect(),
        }
    }
}

impl From<ImmutableDataSource> for SerializedDataSource {
    fn from(data_source: ImmutableDataSource) -> Self {
        Self {
            name: data_source.name,
            segments: data_source.segments.into_values().collect(),
        }
    }
}

impl ImmutableDataSource {
    /// Creates an empty data source view.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            segments: Default::default(),
        }
    }

    /// The name of the data source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The held segments, in id order.
    pub fn segments(&self) -> impl Iterator<Item = &DataSegment> + '_ {
        self.segments.values()
    }

    /// Looks up a held segment.
    pub fn segment(&self, id: &SegmentId) -> Option<&DataSegment> {
        self.segments.get(id)
    }

    /// The number of held segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if no segment of this data source is held.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The total size of all held segments with a known size, saturating at `u64::MAX`.
    pub fn total_size(&self) -> u64 {
        self.segments
            .values()
            .map(DataSegment::size_or_zero)
            .fold(0, u64::saturating_add)
    }
}

/// An immutable snapshot of a server and the segments it reported holding.
///
/// The snapshot is not updated when commands are issued against the server. A drop only
/// becomes visible in the next snapshot that the server reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImmutableServer {
    name: String,
    address: SocketAddr,
    tier: String,
    server_type: ServerType,
    max_size: u64,
    priority: i32,
    data_sources: BTreeMap<String, ImmutableDataSource>,
}

impl ImmutableServer {
    /// Creates a snapshot of a server that holds no segments.
    pub fn new(
        name: impl Into<String>,
        address: SocketAddr,
        tier: impl Into<String>,
        max_size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            tier: tier.into(),
            server_type: ServerType::Historical,
            max_size,
            priority: 0,
            data_sources: Default::default(),
        }
    }

    /// Sets the server type.
    pub fn with_server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    /// Sets the server priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds the given segments to the snapshot.
    pub fn with_segments(mut self, segments: impl IntoIterator<Item = DataSegment>) -> Self {
        for segment in segments {
            self.add_segment(segment);
        }
        self
    }

    /// Adds a single segment to the snapshot, replacing an existing one with the same id.
    pub fn add_segment(&mut self, segment: DataSegment) {
        self.data_sources
            .entry(segment.data_source().to_owned())
            .or_insert_with(|| ImmutableDataSource::new(segment.data_source()))
            .segments
            .insert(segment.id().clone(), segment);
    }

    /// Removes a segment from the snapshot, returning it if it was held.
    pub fn remove_segment(&mut self, id: &SegmentId) -> Option<DataSegment> {
        let data_source = self.data_sources.get_mut(id.data_source())?;
        let removed = data_source.segments.remove(id);
        if data_source.is_empty() {
            self.data_sources.remove(id.data_source());
        }
        removed
    }

    /// The unique name of the server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address on which the server accepts commands.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The tier that the server belongs to.
    pub fn tier(&self) -> &str {
        &self.tier
    }

    /// The type of the server.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The maximum number of bytes that the server can hold.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// The query priority of the server.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The data sources that the server holds at least one segment of, in name order.
    pub fn data_sources(&self) -> impl Iterator<Item = &ImmutableDataSource> + '_ {
        self.data_sources.values()
    }

    /// Looks up a data source by name.
    pub fn data_source(&self, name: &str) -> Option<&ImmutableDataSource> {
        self.data_sources.get(name)
    }

    /// All held segments, grouped by data source.
    pub fn segments(&self) -> impl Iterator<Item = &DataSegment> + '_ {
        self.data_sources.values().flat_map(|ds| ds.segments())
    }

    /// Returns `true` if the server reported holding the given segment.
    pub fn contains_segment(&self, id: &SegmentId) -> bool {
        self.data_sources
            .get(id.data_source())
            .map(|ds| ds.segments.contains_key(id))
            .unwrap_or(false)
    }

    /// The number of held segments.
    pub fn segment_count(&self) -> usize {
        self.data_sources.values().map(|ds| ds.len()).sum()
    }

    /// The number of bytes currently held.
    pub fn curr_size(&self) -> u64 {
        self.data_sources
            .values()
            .map(|ds| ds.total_size())
            .fold(0, u64::saturating_add)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::{DataSegment, Interval, SegmentId};
    use chrono::{TimeZone, Utc};

    /// Creates a one-day segment of the `test` data source on day `day` of January 2024.
    pub fn segment(day: u32, size: u64) -> DataSegment {
        segment_of("test", day, size)
    }

    pub fn segment_of(data_source: &str, day: u32, size: u64) -> DataSegment {
        let start = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        let interval = Interval::try_new(start, start + chrono::Duration::days(1)).unwrap();
        DataSegment::new(SegmentId::new(data_source, interval, "v1", 0), Some(size))
    }

    pub fn addr(port: u16) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([127, 0, 0, 1], port))
    }
}
