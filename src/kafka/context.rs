use courier_types::TopicPartition;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::RebalanceListener;

/// Consumer context that reports partition ownership changes to a
/// `RebalanceListener`
pub struct RebalanceForwarder {
    listener: Arc<dyn RebalanceListener>,
}

impl RebalanceForwarder {
    pub fn new(listener: Arc<dyn RebalanceListener>) -> Self {
        Self { listener }
    }
}

fn to_partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

impl ClientContext for RebalanceForwarder {}

impl ConsumerContext for RebalanceForwarder {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(list) = rebalance {
            let partitions = to_partitions(list);
            info!(count = partitions.len(), "Partitions revoked");
            self.listener.on_partitions_revoked(&partitions);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(list) => {
                let partitions = to_partitions(list);
                info!(count = partitions.len(), "Partitions assigned");
                self.listener.on_partitions_assigned(&partitions);
            }
            Rebalance::Error(err) => warn!(error = %err, "Rebalance error"),
            Rebalance::Revoke(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::PartitionTracker;

    #[test]
    fn test_rebalance_callbacks_reach_listener() {
        let tracker = Arc::new(PartitionTracker::new());
        let context = RebalanceForwarder::new(tracker.clone());

        let mut list = TopicPartitionList::new();
        list.add_partition("orders", 0);
        list.add_partition("orders", 2);

        context.post_rebalance(&Rebalance::Assign(&list));
        assert_eq!(
            tracker.owned(),
            vec![TopicPartition::new("orders", 0), TopicPartition::new("orders", 2)]
        );

        context.pre_rebalance(&Rebalance::Revoke(&list));
        assert!(tracker.owned().is_empty());
    }
}
