use std::time::Duration;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::headers::Headers;
use crate::message::{ReceivedMessage, TopicPartition, TopicPartitionOffset};
use crate::propagation::TracerScopeExt;
use crate::scope::ActiveScope;
use crate::tags;

/// Consumer side of a message bus client.
#[async_trait::async_trait]
pub trait Consumer {
    /// Waits up to `timeout` for the next message. `None` means the
    /// timeout elapsed with nothing to deliver.
    async fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, ClientError>;

    /// Waits for the next message until `cancel` fires, in which case
    /// `None` is returned.
    async fn recv(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>, ClientError>;

    async fn subscribe(&self, topics: &[&str]) -> Result<(), ClientError>;

    async fn unsubscribe(&self) -> Result<(), ClientError>;

    async fn assign(
        &self,
        partitions: &[TopicPartitionOffset],
    ) -> Result<(), ClientError>;

    async fn unassign(&self) -> Result<(), ClientError>;

    async fn seek(
        &self,
        offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError>;

    async fn commit(
        &self,
        offsets: &[TopicPartitionOffset],
    ) -> Result<(), ClientError>;

    async fn committed(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, ClientError>;

    /// Marks `offset` for the next commit without contacting the
    /// broker.
    fn store_offset(
        &self,
        offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError>;

    async fn position(
        &self,
        partition: &TopicPartition,
    ) -> Result<TopicPartitionOffset, ClientError>;

    async fn pause(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError>;

    async fn resume(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError>;

    fn assignment(&self) -> Vec<TopicPartition>;

    fn subscription(&self) -> Vec<String>;

    fn client_id(&self) -> &str;
}

/// Consumer decorator that opens a `receive` span for every delivered
/// message.
///
/// A context carried in the message headers becomes a link on the span.
/// The span's own context is injected into the headers as soon as the
/// span starts, so handing the message onward propagates the receive,
/// and the message coordinates are tagged on the span. The scope is
/// returned together with the message and stays open until the caller
/// closes or drops it, which is when the span ends.
///
/// Calls made through the [`Consumer`] trait delegate to the wrapped
/// consumer unchanged. Use [`TracingConsumer::poll_traced`] or
/// [`TracingConsumer::recv_traced`] to receive a message with its
/// scope.
pub struct TracingConsumer<C, T> {
    consumer: C,
    tracer: T,
}

impl<C, T> TracingConsumer<C, T> {
    pub fn new(tracer: T, consumer: C) -> Self {
        Self { consumer, tracer }
    }

    pub fn inner(&self) -> &C {
        &self.consumer
    }

    pub fn into_inner(self) -> C {
        self.consumer
    }
}

impl<C, T> TracingConsumer<C, T>
where
    C: Consumer + Send + Sync,
    T: TracerScopeExt + Send + Sync,
{
    /// Polls the wrapped consumer and opens a scope for the delivered
    /// message. A poll that returns no message opens no scope and
    /// starts no span.
    pub async fn poll_traced(
        &self,
        timeout: Duration,
    ) -> Result<Option<(ActiveScope, ReceivedMessage)>, ClientError> {
        let Some(mut message) = self.consumer.poll(timeout).await? else {
            return Ok(None);
        };
        let scope = self.open_scope(&mut message);
        Ok(Some((scope, message)))
    }

    /// Cancellable variant of [`TracingConsumer::poll_traced`].
    pub async fn recv_traced(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<(ActiveScope, ReceivedMessage)>, ClientError> {
        let Some(mut message) = self.consumer.recv(cancel).await? else {
            return Ok(None);
        };
        let scope = self.open_scope(&mut message);
        Ok(Some((scope, message)))
    }

    fn open_scope(&self, message: &mut ReceivedMessage) -> ActiveScope {
        let headers = message.headers.get_or_insert_with(Headers::new);
        let scope = self.tracer.start_and_inject_consumer_scope(headers);

        let span = scope.span();
        span.set_attribute(KeyValue::new(
            tags::KAFKA_TOPIC,
            message.topic.clone(),
        ));
        span.set_attribute(KeyValue::new(
            tags::KAFKA_PARTITION,
            i64::from(message.partition),
        ));
        span.set_attribute(KeyValue::new(tags::KAFKA_OFFSET, message.offset));
        scope
    }
}

#[async_trait::async_trait]
impl<C, T> Consumer for TracingConsumer<C, T>
where
    C: Consumer + Send + Sync,
    T: TracerScopeExt + Send + Sync,
{
    async fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        self.consumer.poll(timeout).await
    }

    async fn recv(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        self.consumer.recv(cancel).await
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<(), ClientError> {
        self.consumer.subscribe(topics).await
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.consumer.unsubscribe().await
    }

    async fn assign(
        &self,
        partitions: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        self.consumer.assign(partitions).await
    }

    async fn unassign(&self) -> Result<(), ClientError> {
        self.consumer.unassign().await
    }

    async fn seek(
        &self,
        offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError> {
        self.consumer.seek(offset).await
    }

    async fn commit(
        &self,
        offsets: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        self.consumer.commit(offsets).await
    }

    async fn committed(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, ClientError> {
        self.consumer.committed(partitions).await
    }

    fn store_offset(
        &self,
        offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError> {
        self.consumer.store_offset(offset)
    }

    async fn position(
        &self,
        partition: &TopicPartition,
    ) -> Result<TopicPartitionOffset, ClientError> {
        self.consumer.position(partition).await
    }

    async fn pause(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        self.consumer.pause(partitions).await
    }

    async fn resume(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        self.consumer.resume(partitions).await
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.consumer.assignment()
    }

    fn subscription(&self) -> Vec<String> {
        self.consumer.subscription()
    }

    fn client_id(&self) -> &str {
        self.consumer.client_id()
    }
}
