//! Evaluation results and query replies, serialized for the serving layer.

use crate::storage::types::ConsumerOffset;
use serde::{Serialize, Serializer};
use std::fmt;

/// Health of a consumer group or a single partition.
///
/// Group-level results use `NotFound`/`Ok`/`Warning`/`Error`; partitions
/// refine errors into `Stop`/`Stall`/`Rewind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotFound,
    Ok,
    Warning,
    Error,
    Stop,
    Stall,
    Rewind,
}

impl Status {
    /// The wire-stable string for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::NotFound => "NOTFOUND",
            Status::Ok => "OK",
            Status::Warning => "WARN",
            Status::Error => "ERR",
            Status::Stop => "STOP",
            Status::Stall => "STALL",
            Status::Rewind => "REWIND",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Rule outcome for one partition, with the oldest and newest window entries.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub topic: String,
    pub partition: i32,
    pub status: Status,
    pub start: ConsumerOffset,
    pub end: ConsumerOffset,
}

/// Result of a full group evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerGroupStatus {
    pub cluster: String,
    pub group: String,
    pub status: Status,
    /// False when any partition is missing history or its window is not full.
    pub complete: bool,
    pub partitions: Vec<PartitionStatus>,
    #[serde(rename = "partition_count")]
    pub total_partitions: usize,
    /// The partition with the greatest end-of-window lag, regardless of its
    /// own status.
    pub maxlag: Option<PartitionStatus>,
    #[serde(rename = "totallag")]
    pub total_lag: u64,
}

impl ConsumerGroupStatus {
    pub(crate) fn not_found(cluster: &str, group: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            group: group.to_string(),
            status: Status::NotFound,
            complete: true,
            partitions: Vec::new(),
            total_partitions: 0,
            maxlag: None,
            total_lag: 0,
        }
    }
}

/// Reply to a topic listing request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicListResponse {
    pub topics: Vec<String>,
    pub error: bool,
}

/// Reply to a per-partition offsets request. Absent slots map to -1.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OffsetsResponse {
    pub offsets: Vec<i64>,
    pub error_topic: bool,
    pub error_group: bool,
}
