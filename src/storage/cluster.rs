//! Per-cluster offset tables.
//!
//! Broker head offsets and consumer commit rings live behind two separate
//! read/write locks. Ingest reads broker state first, releases it, then
//! takes the consumer lock; nothing acquires the consumer lock while
//! holding the broker lock, so the evaluator may read broker state inside
//! its consumer critical section.

use super::ring::OffsetRing;
use super::types::{BrokerOffset, ConsumerOffset, PartitionOffset};
use crate::status::{OffsetsResponse, Status, TopicListResponse};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

pub(crate) type BrokerTable = HashMap<String, Vec<Option<BrokerOffset>>>;
pub(crate) type ConsumerTable = HashMap<String, HashMap<String, Vec<Option<OffsetRing>>>>;

pub(crate) struct ClusterOffsets {
    pub(crate) broker: RwLock<BrokerTable>,
    pub(crate) consumer: RwLock<ConsumerTable>,
}

impl ClusterOffsets {
    pub(crate) fn new() -> Self {
        Self {
            broker: RwLock::new(HashMap::new()),
            consumer: RwLock::new(HashMap::new()),
        }
    }

    /// Store a broker head offset, last-writer-wins. Partition vectors grow
    /// to the observed partition count and never shrink.
    pub(crate) async fn record_broker_offset(&self, offset: &PartitionOffset) {
        if offset.partition < 0 || offset.partition as usize >= offset.topic_partition_count {
            warn!(
                cluster = %offset.cluster,
                topic = %offset.topic,
                partition = offset.partition,
                partition_count = offset.topic_partition_count,
                "Dropped broker offset (partition out of range)"
            );
            return;
        }

        let mut broker = self.broker.write().await;
        let topic_list = broker
            .entry(offset.topic.clone())
            .or_insert_with(|| vec![None; offset.topic_partition_count]);
        if offset.topic_partition_count > topic_list.len() {
            topic_list.resize(offset.topic_partition_count, None);
        }

        topic_list[offset.partition as usize] = Some(BrokerOffset {
            offset: offset.offset,
            timestamp_ms: offset.timestamp_ms,
        });
    }

    /// Run a consumer commit through the acceptance pipeline and store it.
    ///
    /// Cluster and blacklist checks have already happened upstream. Broker
    /// prerequisites are read under the broker lock, which is released
    /// before consumer state is touched.
    pub(crate) async fn record_consumer_offset(
        &self,
        offset: &PartitionOffset,
        intervals: usize,
        min_distance_ms: i64,
    ) {
        let (broker_offset, partition_count) = {
            let broker = self.broker.read().await;
            let Some(topic_list) = broker.get(&offset.topic) else {
                // No broker data for this topic yet; skip the commit for now.
                debug!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    timestamp = offset.timestamp_ms,
                    offset = offset.offset,
                    "Dropped offset (no topic)"
                );
                return;
            };

            if offset.partition < 0 {
                warn!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    timestamp = offset.timestamp_ms,
                    offset = offset.offset,
                    "Got a negative partition ID"
                );
                return;
            }

            if offset.partition as usize >= topic_list.len() {
                // Partitions were expanded and the broker poller has not
                // caught up yet.
                debug!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    "Dropped offset (expanded)"
                );
                return;
            }

            let Some(entry) = topic_list[offset.partition as usize] else {
                debug!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    "Dropped offset (no broker offset)"
                );
                return;
            };

            (entry.offset, topic_list.len())
        };

        let mut consumer = self.consumer.write().await;
        let topics = consumer.entry(offset.group.clone()).or_default();
        let partitions = topics
            .entry(offset.topic.clone())
            .or_insert_with(|| vec![None; partition_count]);
        if partitions.len() < partition_count {
            partitions.resize(partition_count, None);
        }

        let partition = offset.partition as usize;
        let ring = partitions[partition].get_or_insert_with(|| OffsetRing::new(intervals));

        if let Some(last) = ring.last() {
            let timestamp_difference = offset.timestamp_ms - last.timestamp_ms;

            // Old and duplicate commits are dropped unless the offset itself
            // advanced (artificial entries carry evaluation-time timestamps,
            // so a genuine commit behind them must be let through on offset).
            if timestamp_difference <= 0 && offset.offset <= last.offset {
                debug!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    timestamp = offset.timestamp_ms,
                    offset = offset.offset,
                    tsdiff = timestamp_difference,
                    lag = broker_offset - offset.offset,
                    "Dropped offset (noadvance)"
                );
                return;
            }

            // Rate-limit genuine commits; an artificial entry lifts the gate
            // so the next real commit supersedes it immediately.
            if !last.artificial
                && timestamp_difference >= 0
                && timestamp_difference < min_distance_ms
            {
                debug!(
                    cluster = %offset.cluster,
                    topic = %offset.topic,
                    partition = offset.partition,
                    group = %offset.group,
                    timestamp = offset.timestamp_ms,
                    offset = offset.offset,
                    tsdiff = timestamp_difference,
                    lag = broker_offset - offset.offset,
                    "Dropped offset (mindistance)"
                );
                return;
            }
        }

        // Broker offsets are polled at an interval, so a commit can be ahead
        // of the head offset we last saw. Clamp to zero lag.
        let lag = (broker_offset - offset.offset).max(0);

        ring.push(ConsumerOffset {
            offset: offset.offset,
            timestamp_ms: offset.timestamp_ms,
            lag,
            artificial: false,
        });

        trace!(
            cluster = %offset.cluster,
            topic = %offset.topic,
            partition = offset.partition,
            group = %offset.group,
            timestamp = offset.timestamp_ms,
            offset = offset.offset,
            lag,
            "Commit offset"
        );
    }

    /// Remove a consumer group on request.
    pub(crate) async fn drop_group(&self, cluster: &str, group: &str) -> Status {
        let mut consumer = self.consumer.write().await;
        if consumer.remove(group).is_some() {
            info!(cluster, group, "Removing group by request");
            Status::Ok
        } else {
            Status::NotFound
        }
    }

    pub(crate) async fn consumer_groups(&self) -> Vec<String> {
        self.consumer.read().await.keys().cloned().collect()
    }

    /// Broker-side topics for an empty group, otherwise the topics this
    /// group has committed on.
    pub(crate) async fn topic_list(&self, group: &str) -> TopicListResponse {
        if group.is_empty() {
            let broker = self.broker.read().await;
            TopicListResponse {
                topics: broker.keys().cloned().collect(),
                error: false,
            }
        } else {
            let consumer = self.consumer.read().await;
            match consumer.get(group) {
                Some(topics) => TopicListResponse {
                    topics: topics.keys().cloned().collect(),
                    error: false,
                },
                None => TopicListResponse {
                    topics: Vec::new(),
                    error: true,
                },
            }
        }
    }

    /// Per-partition head offsets for an empty group, otherwise the last
    /// committed offset of each ring. Absent slots map to -1.
    pub(crate) async fn offsets(&self, topic: &str, group: &str) -> OffsetsResponse {
        if group.is_empty() {
            let broker = self.broker.read().await;
            match broker.get(topic) {
                Some(topic_list) => OffsetsResponse {
                    offsets: topic_list
                        .iter()
                        .map(|slot| slot.map_or(-1, |entry| entry.offset))
                        .collect(),
                    ..OffsetsResponse::default()
                },
                None => OffsetsResponse {
                    error_topic: true,
                    ..OffsetsResponse::default()
                },
            }
        } else {
            let consumer = self.consumer.read().await;
            let Some(topics) = consumer.get(group) else {
                return OffsetsResponse {
                    error_group: true,
                    ..OffsetsResponse::default()
                };
            };
            match topics.get(topic) {
                Some(partitions) => OffsetsResponse {
                    offsets: partitions
                        .iter()
                        .map(|slot| {
                            slot.as_ref()
                                .and_then(OffsetRing::last)
                                .map_or(-1, |entry| entry.offset)
                        })
                        .collect(),
                    ..OffsetsResponse::default()
                },
                None => OffsetsResponse {
                    error_topic: true,
                    ..OffsetsResponse::default()
                },
            }
        }
    }
}
