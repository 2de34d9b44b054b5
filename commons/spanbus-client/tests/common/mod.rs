use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use opentelemetry::trace::{
    SpanContext, TraceContextExt, Tracer as _, TracerProvider,
};
use opentelemetry::{Context, Value, global};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{
    InMemorySpanExporter, SdkTracerProvider, SpanData, Tracer,
};
use tokio_util::sync::CancellationToken;

use spanbus_client::{
    ClientError, Consumer, DeliveryCallback, DeliveryReport, Headers,
    Producer, ProducerRecord, ReceivedMessage, TopicPartition,
    TopicPartitionOffset,
};

/// Tracer backed by an in-memory exporter, with the W3C propagator
/// installed globally so header injection and extraction work.
pub fn test_tracer() -> (Tracer, SdkTracerProvider, InMemorySpanExporter) {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracer = provider.tracer("spanbus-client-tests");
    (tracer, provider, exporter)
}

#[allow(dead_code)]
pub fn span_named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no span named {name}"))
}

#[allow(dead_code)]
pub fn attr<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

#[allow(dead_code)]
pub fn traceparent_of(headers: &mut Headers) -> Option<String> {
    headers.as_map().get("traceparent").map(str::to_owned)
}

/// Headers carrying the context of a finished upstream span, as a
/// remote producer would have written them.
#[allow(dead_code)]
pub fn upstream_headers(tracer: &Tracer) -> (Headers, SpanContext) {
    let mut headers = Headers::new();
    let cx = Context::current().with_span(tracer.start("upstream"));
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut headers.as_map());
    });
    let remote = cx.span().span_context().clone();
    cx.span().end();
    (headers, remote)
}

/// In-memory producer that acknowledges sends with increasing offsets.
///
/// Records are stored after the delivery callback ran, so tests can
/// observe headers the callback path wrote into them. A rejecting
/// producer fails before enqueueing and never runs the callback; a
/// producer failing delivery enqueues fine and reports the error
/// through the callback or the returned result.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockProducer {
    reject_sends: bool,
    fail_delivery: bool,
    next_offset: AtomicI64,
    sent: Mutex<Vec<(String, ProducerRecord)>>,
    failed: Mutex<Vec<(String, ProducerRecord)>>,
}

#[allow(dead_code)]
impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_sends: true,
            ..Self::default()
        }
    }

    pub fn failing_delivery() -> Self {
        Self {
            fail_delivery: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, ProducerRecord)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(String, ProducerRecord)> {
        self.failed.lock().unwrap().clone()
    }

    fn next_report(&self, topic: &str, partition: i32) -> DeliveryReport {
        DeliveryReport {
            topic: topic.to_string(),
            partition,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait::async_trait]
impl Producer for MockProducer {
    async fn send(
        &self,
        topic: &str,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        self.send_to_partition(topic, 0, record).await
    }

    async fn send_to_partition(
        &self,
        topic: &str,
        partition: i32,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        if self.reject_sends {
            return Err(ClientError::UnknownTopic(topic.to_string()));
        }
        if self.fail_delivery {
            self.failed
                .lock()
                .unwrap()
                .push((topic.to_string(), record.clone()));
            return Err(ClientError::Transport("broker unavailable".into()));
        }
        let report = self.next_report(topic, partition);
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), record.clone()));
        Ok(report)
    }

    fn send_with_callback(
        &self,
        topic: &str,
        record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        self.send_to_partition_with_callback(topic, 0, record, on_delivery)
    }

    fn send_to_partition_with_callback(
        &self,
        topic: &str,
        partition: i32,
        mut record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        if self.reject_sends {
            return Err(ClientError::QueueFull);
        }
        if self.fail_delivery {
            let outcome =
                Err(ClientError::Transport("broker unavailable".into()));
            on_delivery(&outcome, &mut record);
            self.failed
                .lock()
                .unwrap()
                .push((topic.to_string(), record));
            return Ok(());
        }
        let outcome = Ok(self.next_report(topic, partition));
        on_delivery(&outcome, &mut record);
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), record));
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), ClientError> {
        Ok(())
    }

    fn in_flight(&self) -> usize {
        0
    }

    fn client_id(&self) -> &str {
        "mock-producer"
    }
}

/// Consumer fed from a scripted message queue. Polling an empty queue
/// returns no message instead of waiting.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockConsumer {
    queue: Mutex<VecDeque<ReceivedMessage>>,
    subscription: Mutex<Vec<String>>,
    assignment: Mutex<Vec<TopicPartition>>,
    committed: Mutex<Vec<TopicPartitionOffset>>,
}

#[allow(dead_code)]
impl MockConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(
        messages: impl IntoIterator<Item = ReceivedMessage>,
    ) -> Self {
        let consumer = Self::default();
        consumer.queue.lock().unwrap().extend(messages);
        consumer
    }

    pub fn enqueue(&self, message: ReceivedMessage) {
        self.queue.lock().unwrap().push_back(message);
    }

    pub fn committed_offsets(&self) -> Vec<TopicPartitionOffset> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Consumer for MockConsumer {
    async fn poll(
        &self,
        _timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn recv(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>, ClientError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<(), ClientError> {
        let mut subscription = self.subscription.lock().unwrap();
        *subscription = topics.iter().map(|t| t.to_string()).collect();
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.subscription.lock().unwrap().clear();
        Ok(())
    }

    async fn assign(
        &self,
        partitions: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        let mut assignment = self.assignment.lock().unwrap();
        *assignment = partitions.iter().map(|p| p.topic_partition()).collect();
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
        unimplemented!("seek not needed for tracing tests")
    }

    async fn commit(
        &self,
        offsets: &[TopicPartitionOffset],
    ) -> Result<(), ClientError> {
        self.committed.lock().unwrap().extend_from_slice(offsets);
        Ok(())
    }

    async fn committed(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, ClientError> {
        let committed = self.committed.lock().unwrap();
        Ok(committed
            .iter()
            .filter(|offset| partitions.contains(&offset.topic_partition()))
            .cloned()
            .collect())
    }

    fn store_offset(
        &self,
        _offset: &TopicPartitionOffset,
    ) -> Result<(), ClientError> {
        unimplemented!("store_offset not needed for tracing tests")
    }

    async fn position(
        &self,
        _partition: &TopicPartition,
    ) -> Result<TopicPartitionOffset, ClientError> {
        unimplemented!("position not needed for tracing tests")
    }

    async fn pause(
        &self,
        _partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        unimplemented!("pause not needed for tracing tests")
    }

    async fn resume(
        &self,
        _partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        unimplemented!("resume not needed for tracing tests")
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().unwrap().clone()
    }

    fn subscription(&self) -> Vec<String> {
        self.subscription.lock().unwrap().clone()
    }

    fn client_id(&self) -> &str {
        "mock-consumer"
    }
}

/// A delivered message carrying the given headers, `None` for a
/// message the broker handed over without a header container.
#[allow(dead_code)]
pub fn delivered_message(
    topic: &str,
    offset: i64,
    headers: Option<Headers>,
) -> ReceivedMessage {
    ReceivedMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        payload: Some(bytes::Bytes::from_static(b"payload")),
        headers,
    }
}
