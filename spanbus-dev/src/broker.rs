use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use spanbus_client::{
    ClientError, Consumer, DeliveryCallback, DeliveryReport, Producer,
    ProducerRecord, ReceivedMessage, TopicPartition, TopicPartitionOffset,
};

/// How long a polling consumer sleeps between queue scans.
const SCAN_INTERVAL: Duration = Duration::from_millis(5);

/// In-process broker backed by one flume channel per partition.
///
/// Topics are created on first use with the broker's default partition
/// count. Handles from [`MemoryBroker::producer`] and
/// [`MemoryBroker::consumer`] implement the client traits, so the
/// tracing decorators wrap them like any real client. Consumers
/// reading the same partition compete for its messages, like members
/// of one consumer group.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
    default_partitions: i32,
}

impl MemoryBroker {
    pub fn new(default_partitions: i32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: DashMap::new(),
            }),
            default_partitions: default_partitions.max(1),
        }
    }

    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(partitions.max(1)));
    }

    pub fn producer(&self, client_id: impl Into<String>) -> MemoryProducer {
        MemoryProducer {
            inner: self.inner.clone(),
            default_partitions: self.default_partitions,
            round_robin: AtomicUsize::new(0),
            client_id: client_id.into(),
        }
    }

    pub fn consumer(&self, client_id: impl Into<String>) -> MemoryConsumer {
        MemoryConsumer {
            inner: self.inner.clone(),
            default_partitions: self.default_partitions,
            client_id: client_id.into(),
            subscription: Mutex::new(Vec::new()),
            assignment: Mutex::new(Vec::new()),
            paused: Mutex::new(HashSet::new()),
            scan_from: AtomicUsize::new(0),
            committed: DashMap::new(),
            stored: DashMap::new(),
            positions: DashMap::new(),
        }
    }
}

struct BrokerInner {
    topics: DashMap<String, TopicState>,
}

struct TopicState {
    partitions: Vec<PartitionState>,
}

impl TopicState {
    fn new(partitions: i32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| PartitionState::new()).collect(),
        }
    }
}

struct PartitionState {
    tx: flume::Sender<ReceivedMessage>,
    rx: flume::Receiver<ReceivedMessage>,
    next_offset: AtomicI64,
}

impl PartitionState {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            next_offset: AtomicI64::new(0),
        }
    }
}

impl BrokerInner {
    fn partition_count(&self, topic: &str, default_partitions: i32) -> usize {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(default_partitions))
            .partitions
            .len()
    }

    /// Claims the next offset of a partition and hands back its sender,
    /// creating the topic when it does not exist yet.
    fn reserve(
        &self,
        topic: &str,
        partition: i32,
        default_partitions: i32,
    ) -> Result<(flume::Sender<ReceivedMessage>, i64), ClientError> {
        let state = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(default_partitions));
        let slot = usize::try_from(partition)
            .ok()
            .and_then(|p| state.partitions.get(p))
            .ok_or_else(|| {
                ClientError::UnknownPartition(topic.to_string(), partition)
            })?;
        let offset = slot.next_offset.fetch_add(1, Ordering::SeqCst);
        Ok((slot.tx.clone(), offset))
    }

    fn receiver(
        &self,
        tp: &TopicPartition,
    ) -> Option<flume::Receiver<ReceivedMessage>> {
        let state = self.topics.get(&tp.topic)?;
        let slot = usize::try_from(tp.partition)
            .ok()
            .and_then(|p| state.partitions.get(p))?;
        Some(slot.rx.clone())
    }
}

fn to_message(
    topic: &str,
    partition: i32,
    offset: i64,
    record: ProducerRecord,
) -> ReceivedMessage {
    ReceivedMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: record.key,
        payload: record.payload,
        headers: Some(record.headers),
    }
}

/// Producer handle for a [`MemoryBroker`].
///
/// Keyed records stick to one partition by key hash; unkeyed records
/// rotate round-robin. Every send is acknowledged synchronously, so
/// nothing is ever in flight and flushing is immediate. Callback sends
/// enqueue the record only after the delivery callback ran, so header
/// mutations made in the callback chain reach the consumer.
pub struct MemoryProducer {
    inner: Arc<BrokerInner>,
    default_partitions: i32,
    round_robin: AtomicUsize,
    client_id: String,
}

impl MemoryProducer {
    fn partition_for(&self, topic: &str, key: Option<&[u8]>) -> i32 {
        let count = self.inner.partition_count(topic, self.default_partitions);
        let slot = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                hasher.finish() as usize % count
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
        };
        slot as i32
    }
}

#[async_trait::async_trait]
impl Producer for MemoryProducer {
    async fn send(
        &self,
        topic: &str,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        let partition = self.partition_for(topic, record.key.as_deref());
        self.send_to_partition(topic, partition, record).await
    }

    async fn send_to_partition(
        &self,
        topic: &str,
        partition: i32,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        let (tx, offset) =
            self.inner.reserve(topic, partition, self.default_partitions)?;
        tx.send(to_message(topic, partition, offset, record.clone()))
            .map_err(|_| ClientError::Closed)?;
        debug!(topic, partition, offset, "delivered record");
        Ok(DeliveryReport {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    fn send_with_callback(
        &self,
        topic: &str,
        record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        let partition = self.partition_for(topic, record.key.as_deref());
        self.send_to_partition_with_callback(
            topic,
            partition,
            record,
            on_delivery,
        )
    }

    fn send_to_partition_with_callback(
        &self,
        topic: &str,
        partition: i32,
        mut record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        let (tx, offset) =
            self.inner.reserve(topic, partition, self.default_partitions)?;
        let report = Ok(DeliveryReport {
            topic: topic.to_string(),
            partition,
            offset,
        });
        on_delivery(&report, &mut record);
        tx.send(to_message(topic, partition, offset, record))
            .map_err(|_| ClientError::Closed)?;
        debug!(topic, partition, offset, "delivered record after callback");
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), ClientError> {
        Ok(())
    }

    fn in_flight(&self) -> usize {
        0
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Consumer handle for a [`MemoryBroker`].
///
/// Subscribing assigns every partition of the named topics, creating
/// missing topics with the broker default. Channels cannot rewind, so
/// `seek` is unsupported; offsets committed here are bookkeeping only.
pub struct MemoryConsumer {
    inner: Arc<BrokerInner>,
    default_partitions: i32,
    client_id: String,
    subscription: Mutex<Vec<String>>,
    assignment: Mutex<Vec<TopicPartition>>,
    paused: Mutex<HashSet<TopicPartition>>,
    scan_from: AtomicUsize,
    committed: DashMap<TopicPartition, i64>,
    stored: DashMap<TopicPartition, i64>,
    positions: DashMap<TopicPartition, i64>,
}

impl MemoryConsumer {
    /// One non-blocking sweep over the assigned partitions, starting at
    /// a rotating index so no partition starves the rest.
    fn try_next(&self) -> Option<ReceivedMessage> {
        let assignment = self.assignment.lock().unwrap().clone();
        if assignment.is_empty() {
            return None;
        }
        let paused = self.paused.lock().unwrap().clone();
        let start =
            self.scan_from.fetch_add(1, Ordering::Relaxed) % assignment.len();

        for tp in assignment.iter().cycle().skip(start).take(assignment.len())
        {
            if paused.contains(tp) {
                continue;
            }
            let Some(rx) = self.inner.receiver(tp) else {
                continue;
            };
            if let Ok(message) = rx.try_recv() {
                self.positions.insert(tp.clone(), message.offset);
                return Some(message);
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl Consumer for MemoryConsumer {
    async fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SCAN_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn recv(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            }
        }
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<(), ClientError> {
        let mut partitions = Vec::new();
        for topic in topics {
            let count =
                self.inner.partition_count(topic, self.default_partitions);
            partitions.extend(
                (0..count).map(|p| TopicPartition::new(*topic, p as i32)),
            );
        }
        debug!(?topics, assigned = partitions.len(), "subscribed");
        *self.subscription.lock().unwrap() =
            topics.iter().map(|t| t.to_string()).collect();
        *self.assignment.lock().unwrap() = partitions;
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.subscription.lock().unwrap().clear();
        self.assignment.lock().unwrap().clear();
        Ok(())
    }

    async fn assign(
        &self,
        partitions: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        *self.assignment.lock().unwrap() =
            partitions.iter().map(|p| p.topic_partition()).collect();
        Ok(())
    }

    async fn unassign(&self) -> Result<(), ClientError> {
        self.assignment.lock().unwrap().clear();
        Ok(())
    }

    async fn seek(
        &self,
        _offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError> {
        // Channel-backed partitions have no history to rewind into.
        Err(ClientError::Unsupported("seek"))
    }

    async fn commit(
        &self,
        offsets: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        if offsets.is_empty() {
            // Kafka-style commit of everything stored so far.
            let stored: Vec<(TopicPartition, i64)> = self
                .stored
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect();
            for (tp, offset) in stored {
                self.stored.remove(&tp);
                self.committed.insert(tp, offset);
            }
            return Ok(());
        }
        for offset in offsets {
            self.committed
                .insert(offset.topic_partition(), offset.offset);
        }
        Ok(())
    }

    async fn committed(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, ClientError> {
        Ok(partitions
            .iter()
            .filter_map(|tp| {
                self.committed.get(tp).map(|offset| {
                    TopicPartitionOffset::new(
                        tp.topic.clone(),
                        tp.partition,
                        *offset,
                    )
                })
            })
            .collect())
    }

    fn store_offset(
        &self,
        offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError> {
        self.stored.insert(offset.topic_partition(), offset.offset);
        Ok(())
    }

    async fn position(
        &self,
        partition: &TopicPartition,
    ) -> Result<TopicPartitionOffset, ClientError> {
        let next = self
            .positions
            .get(partition)
            .map(|offset| *offset + 1)
            .or_else(|| self.committed.get(partition).map(|offset| *offset))
            .unwrap_or(0);
        Ok(TopicPartitionOffset::new(
            partition.topic.clone(),
            partition.partition,
            next,
        ))
    }

    async fn pause(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        let mut paused = self.paused.lock().unwrap();
        paused.extend(partitions.iter().cloned());
        Ok(())
    }

    async fn resume(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        let mut paused = self.paused.lock().unwrap();
        for tp in partitions {
            paused.remove(tp);
        }
        Ok(())
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().unwrap().clone()
    }

    fn subscription(&self) -> Vec<String> {
        self.subscription.lock().unwrap().clone()
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}
