//! Typed requests to the storage actor.
//!
//! Each variant carries a `oneshot` reply channel; reply timeouts are the
//! caller's responsibility. The variant set is closed, so dispatch is
//! exhaustive at compile time.

use crate::status::{ConsumerGroupStatus, OffsetsResponse, Status, TopicListResponse};
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum StorageRequest {
    /// Names of all configured clusters.
    ClusterList {
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Consumer group names in one cluster; empty for an unknown cluster.
    ConsumerList {
        cluster: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Broker-side topics for an empty group, otherwise the group's topics.
    TopicList {
        cluster: String,
        group: String,
        reply: oneshot::Sender<TopicListResponse>,
    },
    /// Per-partition head offsets (empty group) or last committed offsets.
    Offsets {
        cluster: String,
        topic: String,
        group: String,
        reply: oneshot::Sender<OffsetsResponse>,
    },
    /// Full rule evaluation of one consumer group.
    ConsumerStatus {
        cluster: String,
        group: String,
        show_all: bool,
        reply: oneshot::Sender<ConsumerGroupStatus>,
    },
    /// Remove a consumer group from storage.
    ConsumerDrop {
        cluster: String,
        group: String,
        reply: oneshot::Sender<Status>,
    },
}
