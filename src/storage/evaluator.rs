//! Windowed health evaluation for consumer groups.
//!
//! Evaluation runs in two phases. Phase A copies the group's rings out of
//! the table under the consumer write lock, injecting an artificial zero-lag
//! commit for every caught-up partition and flushing the group if its
//! youngest commit has expired. Phase B applies the lag rules over the local
//! copies with no locks held.
//!
//! Rules, in priority order:
//! - stopped: the silence since the last commit exceeds the window span
//! - rewind: the committed offset moved backwards inside the window
//! - caught up: zero lag anywhere that proves progress
//! - stalled: offsets frozen while lag is non-zero
//! - slow: offsets advancing but lag growing across the whole window

use super::cluster::ClusterOffsets;
use super::types::ConsumerOffset;
use crate::status::{ConsumerGroupStatus, PartitionStatus, Status};
use tracing::{info, trace};

/// One partition's window, copied out under lock.
#[derive(Debug)]
pub(crate) struct PartitionWindow {
    pub(crate) topic: String,
    pub(crate) partition: i32,
    /// Chronological, oldest to newest.
    pub(crate) offsets: Vec<ConsumerOffset>,
}

pub(crate) enum GroupSnapshot {
    NotFound,
    Expired,
    Windows {
        windows: Vec<PartitionWindow>,
        total_partitions: usize,
        complete: bool,
    },
}

/// Evaluate one consumer group against the stored history.
pub(crate) async fn evaluate_group(
    offsets: &ClusterOffsets,
    cluster: &str,
    group: &str,
    expire_after_ms: i64,
    show_all: bool,
    now_ms: i64,
) -> ConsumerGroupStatus {
    match snapshot_group(offsets, cluster, group, expire_after_ms, now_ms).await {
        GroupSnapshot::NotFound | GroupSnapshot::Expired => {
            ConsumerGroupStatus::not_found(cluster, group)
        }
        GroupSnapshot::Windows {
            windows,
            total_partitions,
            complete,
        } => apply_rules(
            cluster,
            group,
            &windows,
            total_partitions,
            complete,
            now_ms,
            show_all,
        ),
    }
}

/// Phase A: copy the group's rings into local windows.
///
/// Holds the consumer lock exclusively because artificial commits mutate
/// rings in place. The broker lock is taken shared inside this critical
/// section for the caught-up check; that nesting is safe because no path
/// acquires the consumer lock while holding the broker lock.
pub(crate) async fn snapshot_group(
    offsets: &ClusterOffsets,
    cluster: &str,
    group: &str,
    expire_after_ms: i64,
    now_ms: i64,
) -> GroupSnapshot {
    let mut consumer = offsets.consumer.write().await;
    let Some(topics) = consumer.get_mut(group) else {
        return GroupSnapshot::NotFound;
    };

    let broker = offsets.broker.read().await;

    let mut windows = Vec::new();
    let mut total_partitions = 0;
    let mut complete = true;
    let mut youngest_ms: i64 = 0;

    for (topic, partitions) in topics.iter_mut() {
        let head_offsets = broker.get(topic);
        for (partition, slot) in partitions.iter_mut().enumerate() {
            total_partitions += 1;

            let Some(ring) = slot else {
                complete = false;
                continue;
            };
            if ring.is_empty() {
                complete = false;
                continue;
            }

            // A caught-up consumer may go silent. Synthesize a zero-lag
            // commit so its stale ring does not read as stopped or stalled.
            let head = head_offsets
                .and_then(|list| list.get(partition))
                .copied()
                .flatten();
            let last_offset = ring.last().map(|last| last.offset);
            if let (Some(last_offset), Some(head)) = (last_offset, head) {
                if last_offset >= head.offset {
                    trace!(
                        cluster,
                        topic = %topic,
                        partition,
                        group,
                        timestamp = now_ms,
                        offset = last_offset,
                        "Artificial offset"
                    );
                    ring.push(ConsumerOffset {
                        offset: last_offset,
                        timestamp_ms: now_ms,
                        lag: 0,
                        artificial: true,
                    });
                }
            }

            if ring.len() < ring.capacity() {
                complete = false;
            }

            let window = ring.snapshot();
            for entry in &window {
                if entry.timestamp_ms > youngest_ms {
                    youngest_ms = entry.timestamp_ms;
                }
            }

            windows.push(PartitionWindow {
                topic: topic.clone(),
                partition: partition as i32,
                offsets: window,
            });
        }
    }

    drop(broker);

    // Flush the group when its youngest commit predates the expiry window.
    if youngest_ms > 0 && youngest_ms < now_ms - expire_after_ms {
        info!(cluster, group, "Removing expired group");
        consumer.remove(group);
        return GroupSnapshot::Expired;
    }

    GroupSnapshot::Windows {
        windows,
        total_partitions,
        complete,
    }
}

/// Phase B: apply the lag rules over local windows, lock-free.
pub(crate) fn apply_rules(
    cluster: &str,
    group: &str,
    windows: &[PartitionWindow],
    total_partitions: usize,
    complete: bool,
    now_ms: i64,
    show_all: bool,
) -> ConsumerGroupStatus {
    let mut status = ConsumerGroupStatus {
        cluster: cluster.to_string(),
        group: group.to_string(),
        status: Status::Ok,
        complete,
        partitions: Vec::new(),
        total_partitions,
        maxlag: None,
        total_lag: 0,
    };

    let mut max_lag: i64 = 0;
    for window in windows {
        let (Some(first), Some(last)) = (window.offsets.first(), window.offsets.last()) else {
            continue;
        };

        // A -1 lag marks a commit recorded before any head offset was known;
        // the next topic refresh fills it in.
        if first.lag == -1 {
            status.complete = false;
            continue;
        }

        let verdict = judge_partition(&window.offsets, now_ms);
        let partition_status = PartitionStatus {
            topic: window.topic.clone(),
            partition: window.partition,
            status: verdict,
            start: first.clone(),
            end: last.clone(),
        };

        // Lag accounting covers every partition, whatever its verdict.
        if last.lag > max_lag {
            max_lag = last.lag;
            status.maxlag = Some(partition_status.clone());
        }
        status.total_lag += last.lag as u64;

        match verdict {
            Status::Stop | Status::Stall | Status::Rewind => status.status = Status::Error,
            Status::Warning => {
                if status.status == Status::Ok {
                    status.status = Status::Warning;
                }
            }
            _ => {}
        }

        if verdict != Status::Ok || show_all {
            status.partitions.push(partition_status);
        }
    }

    status
}

/// Rule engine for one non-empty window.
fn judge_partition(offsets: &[ConsumerOffset], now_ms: i64) -> Status {
    let first = &offsets[0];
    let last = &offsets[offsets.len() - 1];

    // Stopped committing: the quiet period since the last commit outweighs
    // the span of the window itself.
    if now_ms - last.timestamp_ms > last.timestamp_ms - first.timestamp_ms {
        return Status::Stop;
    }

    // Rewind anywhere in the window is always reported.
    if offsets
        .windows(2)
        .any(|pair| pair[1].offset < pair[0].offset)
    {
        return Status::Rewind;
    }

    // Caught up at the newest sample.
    if last.lag == 0 {
        return Status::Ok;
    }

    if last.offset == first.offset {
        // Caught up at the oldest sample, else frozen with lag.
        if first.lag == 0 {
            Status::Ok
        } else {
            Status::Stall
        }
    } else {
        // Offsets advance; fine unless lag grew across the whole window.
        if first.lag == 0 || last.lag <= first.lag {
            return Status::Ok;
        }
        let lag_dropped = offsets
            .iter()
            .enumerate()
            .any(|(i, entry)| entry.lag == 0 || (i > 0 && entry.lag < offsets[i - 1].lag));
        if lag_dropped {
            Status::Ok
        } else {
            Status::Warning
        }
    }
}
