//! The storage actor: a single dispatcher multiplexing offset ingestion and
//! typed requests over per-cluster offset tables.
//!
//! The dispatcher never touches state locks itself; every offset and every
//! request is handled on its own task, serialized only by the per-cluster
//! broker/consumer locks. The offset ingress is bounded to apply
//! backpressure to the feed; the request ingress is unbounded and
//! low-volume.

mod cluster;
mod evaluator;
pub mod requests;
mod ring;
pub mod types;

use crate::config::{CompiledBlacklists, Config};
use crate::error::{LagwatchError, Result};
use crate::status::{ConsumerGroupStatus, OffsetsResponse, Status, TopicListResponse};
use cluster::ClusterOffsets;
use requests::StorageRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument};
use types::{unix_timestamp_ms, PartitionOffset};

pub struct OffsetStorage {
    inner: Arc<StorageInner>,
    offset_rx: mpsc::Receiver<PartitionOffset>,
    request_rx: mpsc::UnboundedReceiver<StorageRequest>,
    handle: StorageHandle,
}

/// Clonable handle feeding the storage actor.
#[derive(Clone)]
pub struct StorageHandle {
    offset_tx: mpsc::Sender<PartitionOffset>,
    request_tx: mpsc::UnboundedSender<StorageRequest>,
}

pub(crate) struct StorageInner {
    /// Cluster keys are fixed at construction; handlers rely on that.
    offsets: HashMap<String, ClusterOffsets>,
    blacklists: CompiledBlacklists,
    intervals: usize,
    min_distance_ms: i64,
    expire_group_ms: i64,
}

impl OffsetStorage {
    /// Build the storage from configuration. Fails if a blacklist regex
    /// does not compile.
    pub fn new(config: &Config) -> Result<Self> {
        let blacklists = config.lagcheck.compile_blacklists()?;

        let mut offsets = HashMap::with_capacity(config.clusters.len());
        for cluster in &config.clusters {
            offsets.insert(cluster.name.clone(), ClusterOffsets::new());
        }

        let (offset_tx, offset_rx) = mpsc::channel(config.lagcheck.queue_depth);
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        info!(
            clusters = offsets.len(),
            intervals = config.lagcheck.intervals,
            expire_group = ?config.lagcheck.expire_group,
            min_distance = ?config.lagcheck.min_distance,
            "Created offset storage"
        );

        Ok(Self {
            inner: Arc::new(StorageInner {
                offsets,
                blacklists,
                intervals: config.lagcheck.intervals,
                min_distance_ms: config.lagcheck.min_distance.as_millis() as i64,
                expire_group_ms: config.lagcheck.expire_group.as_millis() as i64,
            }),
            offset_rx,
            request_rx,
            handle: StorageHandle {
                offset_tx,
                request_tx,
            },
        })
    }

    pub fn handle(&self) -> StorageHandle {
        self.handle.clone()
    }

    /// Dispatch loop. Runs until the shutdown channel fires; in-flight
    /// handlers are left to finish on their own tasks.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting storage dispatch loop");

        loop {
            tokio::select! {
                Some(offset) = self.offset_rx.recv() => {
                    let inner = Arc::clone(&self.inner);
                    if offset.is_broker() {
                        tokio::spawn(async move { inner.add_broker_offset(offset).await });
                    } else {
                        tokio::spawn(async move { inner.add_consumer_offset(offset).await });
                    }
                }
                Some(request) = self.request_rx.recv() => {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.handle_request(request).await });
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Storage dispatch loop stopped");
    }
}

impl StorageInner {
    async fn add_broker_offset(&self, offset: PartitionOffset) {
        // Clusters not in the configuration are ignored outright.
        let Some(cluster) = self.offsets.get(&offset.cluster) else {
            debug!(
                cluster = %offset.cluster,
                topic = %offset.topic,
                "Dropped broker offset (unknown cluster)"
            );
            return;
        };
        cluster.record_broker_offset(&offset).await;
    }

    async fn add_consumer_offset(&self, offset: PartitionOffset) {
        let Some(cluster) = self.offsets.get(&offset.cluster) else {
            debug!(
                cluster = %offset.cluster,
                group = %offset.group,
                "Dropped offset (unknown cluster)"
            );
            return;
        };

        if self.blacklists.matches_group(&offset.group)
            || self.blacklists.matches_topic(&offset.topic)
        {
            debug!(
                cluster = %offset.cluster,
                topic = %offset.topic,
                partition = offset.partition,
                group = %offset.group,
                timestamp = offset.timestamp_ms,
                offset = offset.offset,
                "Dropped offset (blacklist)"
            );
            return;
        }

        cluster
            .record_consumer_offset(&offset, self.intervals, self.min_distance_ms)
            .await;
    }

    async fn handle_request(&self, request: StorageRequest) {
        // Requesters may give up and drop their receiver; failed replies are
        // not an error.
        match request {
            StorageRequest::ClusterList { reply } => {
                let _ = reply.send(self.offsets.keys().cloned().collect());
            }
            StorageRequest::ConsumerList { cluster, reply } => {
                let groups = match self.offsets.get(&cluster) {
                    Some(offsets) => offsets.consumer_groups().await,
                    None => Vec::new(),
                };
                let _ = reply.send(groups);
            }
            StorageRequest::TopicList {
                cluster,
                group,
                reply,
            } => {
                let response = match self.offsets.get(&cluster) {
                    Some(offsets) => offsets.topic_list(&group).await,
                    None => TopicListResponse {
                        topics: Vec::new(),
                        error: true,
                    },
                };
                let _ = reply.send(response);
            }
            StorageRequest::Offsets {
                cluster,
                topic,
                group,
                reply,
            } => {
                let response = match self.offsets.get(&cluster) {
                    Some(offsets) => offsets.offsets(&topic, &group).await,
                    None => OffsetsResponse {
                        offsets: Vec::new(),
                        error_topic: true,
                        error_group: true,
                    },
                };
                let _ = reply.send(response);
            }
            StorageRequest::ConsumerStatus {
                cluster,
                group,
                show_all,
                reply,
            } => {
                let status = self
                    .evaluate_group(&cluster, &group, show_all, unix_timestamp_ms())
                    .await;
                let _ = reply.send(status);
            }
            StorageRequest::ConsumerDrop {
                cluster,
                group,
                reply,
            } => {
                let status = match self.offsets.get(&cluster) {
                    Some(offsets) => offsets.drop_group(&cluster, &group).await,
                    None => Status::NotFound,
                };
                let _ = reply.send(status);
            }
        }
    }

    pub(crate) async fn evaluate_group(
        &self,
        cluster: &str,
        group: &str,
        show_all: bool,
        now_ms: i64,
    ) -> ConsumerGroupStatus {
        match self.offsets.get(cluster) {
            Some(offsets) => {
                evaluator::evaluate_group(
                    offsets,
                    cluster,
                    group,
                    self.expire_group_ms,
                    show_all,
                    now_ms,
                )
                .await
            }
            None => ConsumerGroupStatus::not_found(cluster, group),
        }
    }
}

impl StorageHandle {
    /// Queue one offset observation. Awaits when the bounded ingress is at
    /// capacity.
    pub async fn send_offset(&self, offset: PartitionOffset) -> Result<()> {
        self.offset_tx
            .send(offset)
            .await
            .map_err(|_| LagwatchError::Channel("offset ingress closed".to_string()))
    }

    /// Queue a raw request. The typed helpers below cover the common cases.
    pub fn send_request(&self, request: StorageRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| LagwatchError::Channel("request ingress closed".to_string()))
    }

    pub async fn cluster_list(&self) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::ClusterList { reply })?;
        response.await.map_err(reply_dropped)
    }

    pub async fn consumer_list(&self, cluster: &str) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::ConsumerList {
            cluster: cluster.to_string(),
            reply,
        })?;
        response.await.map_err(reply_dropped)
    }

    pub async fn topic_list(&self, cluster: &str, group: &str) -> Result<TopicListResponse> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::TopicList {
            cluster: cluster.to_string(),
            group: group.to_string(),
            reply,
        })?;
        response.await.map_err(reply_dropped)
    }

    pub async fn offsets(
        &self,
        cluster: &str,
        topic: &str,
        group: &str,
    ) -> Result<OffsetsResponse> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::Offsets {
            cluster: cluster.to_string(),
            topic: topic.to_string(),
            group: group.to_string(),
            reply,
        })?;
        response.await.map_err(reply_dropped)
    }

    pub async fn consumer_status(
        &self,
        cluster: &str,
        group: &str,
        show_all: bool,
    ) -> Result<ConsumerGroupStatus> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::ConsumerStatus {
            cluster: cluster.to_string(),
            group: group.to_string(),
            show_all,
            reply,
        })?;
        response.await.map_err(reply_dropped)
    }

    pub async fn drop_group(&self, cluster: &str, group: &str) -> Result<Status> {
        let (reply, response) = oneshot::channel();
        self.send_request(StorageRequest::ConsumerDrop {
            cluster: cluster.to_string(),
            group: group.to_string(),
            reply,
        })?;
        response.await.map_err(reply_dropped)
    }
}

fn reply_dropped(_: oneshot::error::RecvError) -> LagwatchError {
    LagwatchError::Channel("storage reply dropped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, LagcheckConfig};
    use std::time::Duration;
    use tokio::time::sleep;

    fn test_config(clusters: &[&str]) -> Config {
        Config {
            lagcheck: LagcheckConfig {
                intervals: 5,
                min_distance: Duration::from_secs(0),
                queue_depth: 100,
                ..LagcheckConfig::default()
            },
            clusters: clusters
                .iter()
                .map(|name| ClusterConfig {
                    name: (*name).to_string(),
                })
                .collect(),
        }
    }

    fn spawn_storage(config: &Config) -> (StorageHandle, broadcast::Sender<()>) {
        let storage = OffsetStorage::new(config).unwrap();
        let handle = storage.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(storage.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    fn broker_observation(offset: i64, timestamp_ms: i64) -> PartitionOffset {
        PartitionOffset {
            cluster: "local".to_string(),
            topic: "orders".to_string(),
            partition: 0,
            offset,
            timestamp_ms,
            group: String::new(),
            topic_partition_count: 1,
        }
    }

    fn commit(group: &str, offset: i64, timestamp_ms: i64) -> PartitionOffset {
        PartitionOffset {
            group: group.to_string(),
            ..broker_observation(offset, timestamp_ms)
        }
    }

    /// Handlers run on their own tasks, so ingestion is only eventually
    /// visible; poll until the broker offset shows up before committing
    /// against it.
    async fn ingest_broker_offset(handle: &StorageHandle, offset: i64, timestamp_ms: i64) {
        handle
            .send_offset(broker_observation(offset, timestamp_ms))
            .await
            .unwrap();
        for _ in 0..200 {
            let response = handle.offsets("local", "orders", "").await.unwrap();
            if response.offsets.first() == Some(&offset) {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("broker offset not ingested in time");
    }

    async fn wait_for_groups(handle: &StorageHandle, cluster: &str) -> Vec<String> {
        for _ in 0..200 {
            let groups = handle.consumer_list(cluster).await.unwrap();
            if !groups.is_empty() {
                return groups;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("no consumer group ingested in time");
    }

    #[tokio::test]
    async fn test_end_to_end_ingest_and_evaluate() {
        let (handle, _shutdown) = spawn_storage(&test_config(&["local", "staging"]));
        let now = unix_timestamp_ms();

        ingest_broker_offset(&handle, 100, now - 1_000).await;
        handle.send_offset(commit("payments", 100, now)).await.unwrap();

        let groups = wait_for_groups(&handle, "local").await;
        assert_eq!(groups, vec!["payments"]);

        let mut clusters = handle.cluster_list().await.unwrap();
        clusters.sort();
        assert_eq!(clusters, vec!["local", "staging"]);

        let topics = handle.topic_list("local", "payments").await.unwrap();
        assert_eq!(topics.topics, vec!["orders"]);

        let response = handle.offsets("local", "orders", "payments").await.unwrap();
        assert_eq!(response.offsets, vec![100]);

        let status = handle
            .consumer_status("local", "payments", true)
            .await
            .unwrap();
        assert_eq!(status.status, Status::Ok);
        assert_eq!(status.total_partitions, 1);
        assert_eq!(status.partitions[0].end.lag, 0);
    }

    #[tokio::test]
    async fn test_unknown_cluster_requests() {
        let (handle, _shutdown) = spawn_storage(&test_config(&["local"]));

        assert!(handle.consumer_list("ghost").await.unwrap().is_empty());
        assert!(handle.topic_list("ghost", "").await.unwrap().error);

        let response = handle.offsets("ghost", "orders", "payments").await.unwrap();
        assert!(response.error_topic && response.error_group);

        let status = handle
            .consumer_status("ghost", "payments", false)
            .await
            .unwrap();
        assert_eq!(status.status, Status::NotFound);

        assert_eq!(
            handle.drop_group("ghost", "payments").await.unwrap(),
            Status::NotFound
        );
    }

    #[tokio::test]
    async fn test_blacklisted_group_never_stored() {
        let config = Config {
            lagcheck: LagcheckConfig {
                intervals: 5,
                min_distance: Duration::from_secs(0),
                group_blacklist: "^console-consumer-.*".to_string(),
                ..LagcheckConfig::default()
            },
            clusters: vec![ClusterConfig {
                name: "local".to_string(),
            }],
        };
        let (handle, _shutdown) = spawn_storage(&config);
        let now = unix_timestamp_ms();

        ingest_broker_offset(&handle, 100, now).await;
        handle
            .send_offset(commit("console-consumer-42", 50, now))
            .await
            .unwrap();
        handle.send_offset(commit("payments", 50, now)).await.unwrap();

        let groups = wait_for_groups(&handle, "local").await;
        assert_eq!(groups, vec!["payments"]);
    }

    #[tokio::test]
    async fn test_drop_group_round_trip() {
        let (handle, _shutdown) = spawn_storage(&test_config(&["local"]));
        let now = unix_timestamp_ms();

        ingest_broker_offset(&handle, 100, now).await;
        handle.send_offset(commit("payments", 90, now)).await.unwrap();
        wait_for_groups(&handle, "local").await;

        assert_eq!(
            handle.drop_group("local", "payments").await.unwrap(),
            Status::Ok
        );
        assert_eq!(
            handle.drop_group("local", "payments").await.unwrap(),
            Status::NotFound
        );
        assert!(handle.consumer_list("local").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let (handle, shutdown) = spawn_storage(&test_config(&["local"]));

        assert!(handle.cluster_list().await.is_ok());
        shutdown.send(()).unwrap();

        // Once the dispatcher drops its receivers, sends start failing.
        let mut closed = false;
        for _ in 0..200 {
            let (reply, _response) = oneshot::channel();
            if handle
                .send_request(StorageRequest::ClusterList { reply })
                .is_err()
            {
                closed = true;
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(closed);
    }
}
