// ============================================================================
// In-Memory Log Broker
// ============================================================================
//
// Process-local stand-in for the partitioned log, used by the test suite and
// for local demos without a Kafka cluster. It mirrors the parts of Kafka the
// delivery core relies on:
//
// - Topics are split into partitions; the key picks the partition with the
//   Kafka default (murmur2) partitioner.
// - Consumer groups keep committed offsets per partition. Each group member
//   owns a disjoint subset of partitions; joins and leaves reassign them and
//   fire revoke/assign callbacks. Distinct groups read independently.
// - A new owner resumes from the committed offset (earliest if none), so
//   anything read but not committed is delivered again.
// - Transactional records stay invisible until commit (read_committed);
//   aborted records are skipped.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::TopicPartition;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::partitioner::partition_for_key;
use super::{
    BrokerError, BrokerTransaction, Headers, InboundRecord, LogBroker, OutboundRecord,
    RebalanceListener, RecordMetadata, Subscription,
};

const DEFAULT_PARTITIONS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Committed,
    Pending(u64),
    Aborted,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: Headers,
    timestamp: DateTime<Utc>,
    visibility: Visibility,
}

#[derive(Debug, Default)]
struct MemberState {
    topics: Vec<String>,
    assignment: BTreeSet<TopicPartition>,
}

#[derive(Debug, Default)]
struct GroupState {
    members: BTreeMap<u64, MemberState>,
    committed: HashMap<TopicPartition, i64>,
    generation: u64,
}

impl GroupState {
    /// Spread every partition of every subscribed topic over the members
    /// subscribed to that topic, round-robin by member id.
    fn rebalance(&mut self, topics: &HashMap<String, Vec<Vec<StoredRecord>>>) {
        for member in self.members.values_mut() {
            member.assignment.clear();
        }

        let subscribed: BTreeSet<String> = self
            .members
            .values()
            .flat_map(|m| m.topics.iter().cloned())
            .collect();

        for topic in subscribed {
            let partitions = topics.get(&topic).map(|p| p.len()).unwrap_or(0);
            let owners: Vec<u64> = self
                .members
                .iter()
                .filter(|(_, m)| m.topics.contains(&topic))
                .map(|(id, _)| *id)
                .collect();
            if owners.is_empty() {
                continue;
            }
            for partition in 0..partitions {
                let owner = owners[partition % owners.len()];
                if let Some(member) = self.members.get_mut(&owner) {
                    member
                        .assignment
                        .insert(TopicPartition::new(topic.clone(), partition as i32));
                }
            }
        }

        self.generation += 1;
    }
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
    next_member_id: u64,
    next_txn_id: u64,
    failing_sends: usize,
    closed: bool,
}

impl LogState {
    fn ensure_topic(&mut self, topic: &str, partitions: i32) -> &mut Vec<Vec<StoredRecord>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize])
    }

    fn append(
        &mut self,
        record: OutboundRecord,
        default_partitions: i32,
        visibility: Visibility,
    ) -> (TopicPartition, RecordMetadata) {
        let log = self.ensure_topic(&record.topic, default_partitions);
        let partition = partition_for_key(record.key.as_bytes(), log.len() as i32);
        let timestamp = Utc::now();
        let entries = &mut log[partition as usize];
        entries.push(StoredRecord {
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            timestamp,
            visibility,
        });
        let offset = (entries.len() - 1) as i64;

        (
            TopicPartition::new(record.topic.clone(), partition),
            RecordMetadata {
                topic: record.topic,
                partition,
                offset,
                timestamp,
            },
        )
    }
}

/// Partitioned in-process log with consumer groups
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<LogState>>,
    notify: Arc<Notify>,
    partitions: i32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    /// Broker whose auto-created topics have `partitions` partitions
    pub fn new(partitions: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            notify: Arc::new(Notify::new()),
            partitions: partitions.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create `topic` with an explicit partition count (no-op if it exists)
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.lock().ensure_topic(topic, partitions);
    }

    /// Make the next `count` sends fail as if the broker were unreachable
    pub fn fail_next_sends(&self, count: usize) {
        self.lock().failing_sends = count;
    }

    /// Every visible record of `topic`, by partition then offset
    pub fn records(&self, topic: &str) -> Vec<InboundRecord> {
        let state = self.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, entries)| {
                entries
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.visibility == Visibility::Committed)
                    .map(move |(offset, r)| to_inbound(topic, partition as i32, offset as i64, r))
            })
            .collect()
    }

    /// Members of `group` currently subscribed to `topic`
    pub fn member_count(&self, group: &str, topic: &str) -> usize {
        self.lock()
            .groups
            .get(group)
            .map(|g| {
                g.members
                    .values()
                    .filter(|m| m.topics.iter().any(|t| t == topic))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Next offset `group` will resume from on `partition` of `topic`
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .groups
            .get(group)
            .and_then(|g| g.committed.get(&TopicPartition::new(topic, partition)).copied())
    }

    /// Close the broker: pending and future receives fail with `Closed`
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn leave(&self, group: &str, member_id: u64) {
        let mut state = self.lock();
        let LogState { topics, groups, .. } = &mut *state;
        if let Some(group_state) = groups.get_mut(group) {
            if group_state.members.remove(&member_id).is_some() {
                group_state.rebalance(topics);
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

fn to_inbound(topic: &str, partition: i32, offset: i64, record: &StoredRecord) -> InboundRecord {
    InboundRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(record.key.clone()),
        payload: Some(record.payload.clone()),
        headers: record.headers.clone(),
        timestamp: record.timestamp,
    }
}

#[async_trait]
impl LogBroker for InMemoryBroker {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(BrokerError::Send {
                topic: record.topic,
                reason: "broker unreachable".to_string(),
            });
        }

        let (_, metadata) = state.append(record, self.partitions, Visibility::Committed);
        drop(state);
        self.notify.notify_waiters();
        Ok(metadata)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.next_txn_id += 1;
        Ok(Box::new(MemoryTransaction {
            broker: self.clone(),
            txn_id: state.next_txn_id,
            appended: Vec::new(),
            finished: false,
        }))
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe("no topics given".to_string()));
        }

        let member_id = {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            for topic in topics {
                state.ensure_topic(topic, self.partitions);
            }
            state.next_member_id += 1;
            let member_id = state.next_member_id;

            let LogState { topics: logs, groups, .. } = &mut *state;
            let group_state = groups.entry(group.to_string()).or_default();
            group_state.members.insert(
                member_id,
                MemberState {
                    topics: topics.to_vec(),
                    assignment: BTreeSet::new(),
                },
            );
            group_state.rebalance(logs);
            member_id
        };
        self.notify.notify_waiters();

        debug!(group = %group, member_id = member_id, topics = ?topics, "Member joined group");

        let mut subscription = MemorySubscription {
            broker: self.clone(),
            group: group.to_string(),
            member_id,
            listener,
            owned: BTreeSet::new(),
            positions: HashMap::new(),
            seen_generation: 0,
            cursor: 0,
            closed: false,
        };
        // Initial assignment is reported before the first record
        let (revoked, assigned) = {
            let mut state = self.lock();
            subscription.sync_assignment(&mut state)
        };
        subscription.notify_listener(&revoked, &assigned);

        Ok(Box::new(subscription))
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemorySubscription {
    broker: InMemoryBroker,
    group: String,
    member_id: u64,
    listener: Arc<dyn RebalanceListener>,
    owned: BTreeSet<TopicPartition>,
    positions: HashMap<TopicPartition, i64>,
    seen_generation: u64,
    cursor: usize,
    closed: bool,
}

impl MemorySubscription {
    /// Adopt the group's current assignment; returns (revoked, assigned)
    fn sync_assignment(
        &mut self,
        state: &mut LogState,
    ) -> (Vec<TopicPartition>, Vec<TopicPartition>) {
        let Some(group) = state.groups.get(&self.group) else {
            return (Vec::new(), Vec::new());
        };
        if group.generation == self.seen_generation {
            return (Vec::new(), Vec::new());
        }
        self.seen_generation = group.generation;

        let current = group
            .members
            .get(&self.member_id)
            .map(|m| m.assignment.clone())
            .unwrap_or_default();

        let revoked: Vec<TopicPartition> = self.owned.difference(&current).cloned().collect();
        let assigned: Vec<TopicPartition> = current.difference(&self.owned).cloned().collect();

        for tp in &revoked {
            self.positions.remove(tp);
        }
        for tp in &assigned {
            let resume_at = group.committed.get(tp).copied().unwrap_or(0);
            self.positions.insert(tp.clone(), resume_at);
        }
        self.owned = current;

        (revoked, assigned)
    }

    fn notify_listener(&self, revoked: &[TopicPartition], assigned: &[TopicPartition]) {
        if !revoked.is_empty() {
            self.listener.on_partitions_revoked(revoked);
        }
        if !assigned.is_empty() {
            self.listener.on_partitions_assigned(assigned);
        }
    }

    fn take_next(&mut self, state: &LogState) -> Option<InboundRecord> {
        let owned: Vec<TopicPartition> = self.owned.iter().cloned().collect();
        if owned.is_empty() {
            return None;
        }

        for step in 0..owned.len() {
            let idx = (self.cursor + step) % owned.len();
            let tp = &owned[idx];
            let Some(entries) = state
                .topics
                .get(&tp.topic)
                .and_then(|p| p.get(tp.partition as usize))
            else {
                continue;
            };
            let position = self.positions.entry(tp.clone()).or_insert(0);

            while let Some(entry) = entries.get(*position as usize) {
                match entry.visibility {
                    Visibility::Aborted => *position += 1,
                    // Stop at the first open transaction (read_committed)
                    Visibility::Pending(_) => break,
                    Visibility::Committed => {
                        let record = to_inbound(&tp.topic, tp.partition, *position, entry);
                        *position += 1;
                        self.cursor = idx + 1;
                        return Some(record);
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<InboundRecord, BrokerError> {
        let broker = self.broker.clone();
        let notify = broker.notify.clone();
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (revoked, assigned, record) = {
                let mut state = broker.lock();
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let (revoked, assigned) = self.sync_assignment(&mut state);
                let record = self.take_next(&state);
                (revoked, assigned, record)
            };
            self.notify_listener(&revoked, &assigned);

            if let Some(record) = record {
                return Ok(record);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<(), BrokerError> {
        let tp = record.topic_partition();
        let mut state = self.broker.lock();
        let group = state
            .groups
            .get_mut(&self.group)
            .ok_or_else(|| BrokerError::Commit(format!("unknown group {}", self.group)))?;

        let owns = group
            .members
            .get(&self.member_id)
            .map(|m| m.assignment.contains(&tp))
            .unwrap_or(false);
        if !owns {
            return Err(BrokerError::Commit(format!(
                "partition {} is no longer assigned to this member",
                tp
            )));
        }

        group.committed.insert(tp, record.offset + 1);
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrokerError> {
        let owned: Vec<TopicPartition> = self.owned.iter().cloned().collect();
        self.closed = true;
        self.broker.leave(&self.group, self.member_id);
        if !owned.is_empty() {
            self.listener.on_partitions_revoked(&owned);
        }
        debug!(group = %self.group, member_id = self.member_id, "Member left group");
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        // Abrupt exit: leave without revoke callbacks or further commits
        if !self.closed {
            self.broker.leave(&self.group, self.member_id);
        }
    }
}

struct MemoryTransaction {
    broker: InMemoryBroker,
    txn_id: u64,
    appended: Vec<(TopicPartition, i64)>,
    finished: bool,
}

impl MemoryTransaction {
    fn finish(&mut self, visibility: Visibility) {
        let mut state = self.broker.lock();
        for (tp, offset) in &self.appended {
            if let Some(entry) = state
                .topics
                .get_mut(&tp.topic)
                .and_then(|p| p.get_mut(tp.partition as usize))
                .and_then(|entries| entries.get_mut(*offset as usize))
            {
                if entry.visibility == Visibility::Pending(self.txn_id) {
                    entry.visibility = visibility;
                }
            }
        }
        self.finished = true;
        drop(state);
        self.broker.notify.notify_waiters();
    }
}

#[async_trait]
impl BrokerTransaction for MemoryTransaction {
    async fn send(&mut self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(BrokerError::Send {
                topic: record.topic,
                reason: "broker unreachable".to_string(),
            });
        }
        let (tp, metadata) =
            state.append(record, self.broker.partitions, Visibility::Pending(self.txn_id));
        self.appended.push((tp, metadata.offset));
        Ok(metadata)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.finish(Visibility::Committed);
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.finish(Visibility::Aborted);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Visibility::Aborted);
        }
    }
}
