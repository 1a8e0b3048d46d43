use serde::Serialize;

/// One observation from the offset feed.
///
/// An empty `group` marks a broker head-offset observation (with
/// `topic_partition_count` set); a non-empty `group` marks a consumer commit.
#[derive(Debug, Clone)]
pub struct PartitionOffset {
    pub cluster: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub group: String,
    pub topic_partition_count: usize,
}

impl PartitionOffset {
    pub fn is_broker(&self) -> bool {
        self.group.is_empty()
    }
}

/// Latest produced position for one topic-partition, last-writer-wins.
#[derive(Debug, Clone, Copy)]
pub struct BrokerOffset {
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// One slot of a partition's commit history ring.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerOffset {
    pub offset: i64,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub lag: i64,
    /// Synthesized by the evaluator for caught-up consumers rather than
    /// received from the feed.
    #[serde(skip)]
    pub(crate) artificial: bool,
}

pub(crate) fn unix_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}
