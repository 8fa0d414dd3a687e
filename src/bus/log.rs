//! In-process partitioned log
//!
//! The bus itself is an external system; this implementation keeps its
//! contract (partitioned append-only logs, consumer groups, manual commits,
//! redelivery from the committed position) inside one process so the
//! pipelines can be wired together locally and exercised in tests.
//!
//! One subscription equals one group member. Splitting partitions across
//! several members of the same group is the real bus's job and is not
//! reproduced here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{BusConsumer, BusError, BusPublisher, DEFAULT_PARTITIONS, Delivery};

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<Arc<[u8]>>>,
    round_robin: usize,
    /// group -> per-partition resume position.
    committed: HashMap<String, Vec<Option<i64>>>,
    /// group -> every commit ever made, in order.
    commit_history: HashMap<String, Vec<(i32, i64)>>,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions],
            ..Self::default()
        }
    }
}

struct BusInner {
    topics: Mutex<HashMap<String, TopicLog>>,
    publish_notify: Notify,
}

/// Shared in-process bus. Cloning is cheap and clones address the same logs.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                publish_notify: Notify::new(),
            }),
        }
    }

    /// Create `topic` with an explicit partition count. Publishing or
    /// subscribing auto-creates topics with [`DEFAULT_PARTITIONS`].
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut topics = self.inner.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(partitions));
    }

    /// Subscribe as a member of `group`, resuming from the committed
    /// positions (start of log where none exist).
    pub fn subscribe(&self, topic: &str, group: &str) -> LogConsumer {
        let positions = {
            let mut topics = self.inner.topics.lock().unwrap();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(DEFAULT_PARTITIONS));
            resume_positions(log, group)
        };
        LogConsumer {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            cursor: Mutex::new(Cursor {
                positions,
                next_partition: 0,
            }),
        }
    }

    /// Latest committed resume position of `group` on `partition`.
    pub fn committed(&self, topic: &str, group: &str, partition: i32) -> Option<i64> {
        let topics = self.inner.topics.lock().unwrap();
        topics
            .get(topic)?
            .committed
            .get(group)?
            .get(partition as usize)
            .copied()
            .flatten()
    }

    /// Every offset `group` ever committed on `partition`, in commit order.
    pub fn commit_history(&self, topic: &str, group: &str, partition: i32) -> Vec<i64> {
        let topics = self.inner.topics.lock().unwrap();
        topics
            .get(topic)
            .and_then(|log| log.commit_history.get(group))
            .map(|history| {
                history
                    .iter()
                    .filter(|(p, _)| *p == partition)
                    .map(|(_, o)| *o)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn resume_positions(log: &TopicLog, group: &str) -> Vec<i64> {
    (0..log.partitions.len())
        .map(|p| {
            log.committed
                .get(group)
                .and_then(|c| c.get(p).copied().flatten())
                .unwrap_or(0)
        })
        .collect()
}

#[async_trait]
impl BusPublisher for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(i32, i64), BusError> {
        let (partition, offset) = {
            let mut topics = self.inner.topics.lock().unwrap();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(DEFAULT_PARTITIONS));
            let partition = log.round_robin % log.partitions.len();
            log.round_robin = log.round_robin.wrapping_add(1);
            let offset = log.partitions[partition].len() as i64;
            log.partitions[partition].push(payload.into());
            (partition as i32, offset)
        };
        self.inner.publish_notify.notify_waiters();
        Ok((partition, offset))
    }
}

struct Cursor {
    /// Next offset to read per partition (independent of commits).
    positions: Vec<i64>,
    /// Partition to try first, for fairness between partitions.
    next_partition: usize,
}

/// One group member's subscription to a topic.
pub struct LogConsumer {
    inner: Arc<BusInner>,
    topic: String,
    group: String,
    cursor: Mutex<Cursor>,
}

impl LogConsumer {
    fn try_next(&self) -> Result<Option<Delivery>, BusError> {
        let topics = self.inner.topics.lock().unwrap();
        let log = topics
            .get(&self.topic)
            .ok_or_else(|| BusError::UnknownTopic(self.topic.clone()))?;

        let mut cursor = self.cursor.lock().unwrap();
        if cursor.positions.len() < log.partitions.len() {
            cursor.positions.resize(log.partitions.len(), 0);
        }

        let parts = log.partitions.len();
        for i in 0..parts {
            let p = (cursor.next_partition + i) % parts;
            let pos = cursor.positions[p];
            if let Some(payload) = log.partitions[p].get(pos as usize) {
                cursor.positions[p] = pos + 1;
                cursor.next_partition = (p + 1) % parts;
                return Ok(Some(Delivery {
                    partition: p as i32,
                    offset: pos,
                    payload: payload.to_vec(),
                }));
            }
        }
        Ok(None)
    }

    /// Drop the read positions back to the committed ones, as a rebalance or
    /// restart would. Uncommitted deliveries are seen again.
    pub fn reset_to_committed(&self) {
        let topics = self.inner.topics.lock().unwrap();
        if let Some(log) = topics.get(&self.topic) {
            let mut cursor = self.cursor.lock().unwrap();
            cursor.positions = resume_positions(log, &self.group);
            cursor.next_partition = 0;
        }
    }
}

#[async_trait]
impl BusConsumer for LogConsumer {
    async fn next(&self) -> Result<Delivery, BusError> {
        loop {
            let notified = self.inner.publish_notify.notified();
            if let Some(delivery) = self.try_next()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BusError> {
        let mut topics = self.inner.topics.lock().unwrap();
        let log = topics
            .get_mut(&self.topic)
            .ok_or_else(|| BusError::UnknownTopic(self.topic.clone()))?;

        let parts = log.partitions.len();
        if partition < 0 || partition as usize >= parts {
            return Err(BusError::CommitRejected(format!(
                "partition {partition} out of range for {}",
                self.topic
            )));
        }

        let committed = log
            .committed
            .entry(self.group.clone())
            .or_insert_with(|| vec![None; parts]);
        committed[partition as usize] = Some(next_offset);
        log.commit_history
            .entry(self.group.clone())
            .or_default()
            .push((partition, next_offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_assigns_round_robin_partitions() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 3);

        let mut seen = Vec::new();
        for n in 0..6u8 {
            let (partition, offset) = bus.publish("t", vec![n]).await.unwrap();
            seen.push((partition, offset));
        }

        assert_eq!(seen, vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
    }

    #[tokio::test]
    async fn test_consumer_sees_every_message_in_partition_order() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 2);
        for n in 0..4u8 {
            bus.publish("t", vec![n]).await.unwrap();
        }

        let consumer = bus.subscribe("t", "g");
        let mut by_partition: HashMap<i32, Vec<i64>> = HashMap::new();
        for _ in 0..4 {
            let d = consumer.next().await.unwrap();
            by_partition.entry(d.partition).or_default().push(d.offset);
        }

        assert_eq!(by_partition[&0], vec![0, 1]);
        assert_eq!(by_partition[&1], vec![0, 1]);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 1);
        bus.publish("t", b"m".to_vec()).await.unwrap();

        let a = bus.subscribe("t", "group-a");
        let b = bus.subscribe("t", "group-b");

        assert_eq!(a.next().await.unwrap().offset, 0);
        assert_eq!(b.next().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_next_wakes_on_publish() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 1);
        let consumer = bus.subscribe("t", "g");

        let waiter = tokio::spawn(async move { consumer.next().await.unwrap().payload });
        tokio::task::yield_now().await;
        bus.publish("t", b"late".to_vec()).await.unwrap();

        assert_eq!(waiter.await.unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn test_reset_to_committed_redelivers_uncommitted() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 1);
        for n in 0..3u8 {
            bus.publish("t", vec![n]).await.unwrap();
        }

        let consumer = bus.subscribe("t", "g");
        for _ in 0..2 {
            consumer.next().await.unwrap();
        }
        consumer.commit(0, 1).await.unwrap();

        consumer.reset_to_committed();
        let redelivered = consumer.next().await.unwrap();
        assert_eq!(redelivered.offset, 1);

        assert_eq!(bus.committed("t", "g", 0), Some(1));
        assert_eq!(bus.commit_history("t", "g", 0), vec![1]);
    }

    #[tokio::test]
    async fn test_fresh_subscription_resumes_from_commit() {
        let bus = InMemoryBus::new();
        bus.create_topic("t", 1);
        for n in 0..3u8 {
            bus.publish("t", vec![n]).await.unwrap();
        }

        let first = bus.subscribe("t", "g");
        first.next().await.unwrap();
        first.next().await.unwrap();
        first.commit(0, 2).await.unwrap();
        drop(first);

        let second = bus.subscribe("t", "g");
        assert_eq!(second.next().await.unwrap().offset, 2);
    }
}
