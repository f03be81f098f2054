use courier_types::TopicPartition;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::broker::{InboundRecord, RebalanceListener};

/// Per-partition progress of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub processed: u64,
    pub last_offset: Option<i64>,
}

/// Tracks the partitions this worker owns. State for a partition is dropped
/// on revoke and starts fresh on assign, so nothing outlives ownership.
#[derive(Debug, Default)]
pub struct PartitionTracker {
    owned: Mutex<HashMap<TopicPartition, PartitionStats>>,
}

impl PartitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TopicPartition, PartitionStats>> {
        self.owned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_handled(&self, record: &InboundRecord) {
        let mut owned = self.lock();
        let stats = owned.entry(record.topic_partition()).or_default();
        stats.processed += 1;
        stats.last_offset = Some(record.offset);
    }

    pub fn owned(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<_> = self.lock().keys().cloned().collect();
        partitions.sort();
        partitions
    }

    pub fn stats(&self, partition: &TopicPartition) -> Option<PartitionStats> {
        self.lock().get(partition).cloned()
    }
}

impl RebalanceListener for PartitionTracker {
    fn on_partitions_assigned(&self, partitions: &[TopicPartition]) {
        let mut owned = self.lock();
        for tp in partitions {
            owned.insert(tp.clone(), PartitionStats::default());
        }
        info!(partitions = ?partitions, "Partitions assigned");
    }

    fn on_partitions_revoked(&self, partitions: &[TopicPartition]) {
        let mut owned = self.lock();
        for tp in partitions {
            if let Some(stats) = owned.remove(tp) {
                info!(
                    partition = %tp,
                    processed = stats.processed,
                    last_offset = ?stats.last_offset,
                    "Partition revoked"
                );
            }
        }
    }
}
