use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::{FutureExt, SpanRef, Status};

use crate::error::ClientError;
use crate::message::{DeliveryReport, ProducerRecord};
use crate::propagation::TracerScopeExt;
use crate::tags;

/// Callback invoked once per enqueued record when the broker reports
/// the delivery outcome. The record is handed back mutably so the
/// callback can read or amend its headers.
pub type DeliveryCallback =
    Box<dyn FnOnce(&Result<DeliveryReport, ClientError>, &mut ProducerRecord) + Send>;

/// Producer side of a message bus client.
#[async_trait::async_trait]
pub trait Producer {
    /// Sends a record to `topic` and waits for the delivery report.
    async fn send(
        &self,
        topic: &str,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError>;

    /// Sends a record to an explicit partition of `topic`.
    async fn send_to_partition(
        &self,
        topic: &str,
        partition: i32,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError>;

    /// Enqueues a record and reports the outcome through `on_delivery`
    /// instead of awaiting it. An error here means the record was never
    /// enqueued and the callback will not run.
    fn send_with_callback(
        &self,
        topic: &str,
        record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError>;

    /// Partition-addressed variant of
    /// [`Producer::send_with_callback`].
    fn send_to_partition_with_callback(
        &self,
        topic: &str,
        partition: i32,
        record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError>;

    /// Waits until every outstanding record is acknowledged.
    async fn flush(&self, timeout: Duration) -> Result<(), ClientError>;

    /// Number of records sent but not yet acknowledged.
    fn in_flight(&self) -> usize;

    fn client_id(&self) -> &str;
}

/// Producer decorator that wraps every send in a `send` span and
/// propagates the span context through the record headers.
///
/// The span parents on the context already carried by the record, or on
/// the caller's current context when the record carries none. Delivery
/// coordinates are tagged once the broker acknowledges, the span status
/// records a failed send, and in both cases the span context is written
/// into the record headers right before the span ends. A send failure is
/// still returned to the caller after the span is closed.
pub struct TracingProducer<P, T> {
    producer: P,
    tracer: T,
}

impl<P, T> TracingProducer<P, T> {
    pub fn new(tracer: T, producer: P) -> Self {
        Self { producer, tracer }
    }

    pub fn inner(&self) -> &P {
        &self.producer
    }

    pub fn into_inner(self) -> P {
        self.producer
    }
}

#[async_trait::async_trait]
impl<P, T> Producer for TracingProducer<P, T>
where
    P: Producer + Send + Sync,
    T: TracerScopeExt + Send + Sync,
{
    async fn send(
        &self,
        topic: &str,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        let mut scope = self.tracer.start_producer_scope(&mut record.headers);
        scope.span().set_attribute(KeyValue::new(
            tags::MESSAGE_BUS_DESTINATION,
            topic.to_string(),
        ));

        let result = self
            .producer
            .send(topic, record)
            .with_context(scope.context().clone())
            .await;
        match &result {
            Ok(report) => tag_delivery(&scope.span(), report),
            Err(error) => {
                scope.span().set_status(Status::error(error.to_string()))
            }
        }
        scope.close(&mut record.headers);
        result
    }

    async fn send_to_partition(
        &self,
        topic: &str,
        partition: i32,
        record: &mut ProducerRecord,
    ) -> Result<DeliveryReport, ClientError> {
        let mut scope = self.tracer.start_producer_scope(&mut record.headers);
        scope.span().set_attribute(KeyValue::new(
            tags::MESSAGE_BUS_DESTINATION,
            topic.to_string(),
        ));

        let result = self
            .producer
            .send_to_partition(topic, partition, record)
            .with_context(scope.context().clone())
            .await;
        match &result {
            Ok(report) => tag_delivery(&scope.span(), report),
            Err(error) => {
                scope.span().set_status(Status::error(error.to_string()))
            }
        }
        scope.close(&mut record.headers);
        result
    }

    fn send_with_callback(
        &self,
        topic: &str,
        mut record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        let mut scope = self.tracer.start_producer_scope(&mut record.headers);
        scope.span().set_attribute(KeyValue::new(
            tags::MESSAGE_BUS_DESTINATION,
            topic.to_string(),
        ));
        self.producer.send_with_callback(
            topic,
            record,
            Box::new(move |report, record| {
                match report {
                    Ok(delivery) => tag_delivery(&scope.span(), delivery),
                    Err(error) => scope
                        .span()
                        .set_status(Status::error(error.to_string())),
                }
                on_delivery(report, record);
                scope.close(&mut record.headers);
            }),
        )
    }

    fn send_to_partition_with_callback(
        &self,
        topic: &str,
        partition: i32,
        mut record: ProducerRecord,
        on_delivery: DeliveryCallback,
    ) -> Result<(), ClientError> {
        let mut scope = self.tracer.start_producer_scope(&mut record.headers);
        scope.span().set_attribute(KeyValue::new(
            tags::MESSAGE_BUS_DESTINATION,
            topic.to_string(),
        ));
        self.producer.send_to_partition_with_callback(
            topic,
            partition,
            record,
            Box::new(move |report, record| {
                match report {
                    Ok(delivery) => tag_delivery(&scope.span(), delivery),
                    Err(error) => scope
                        .span()
                        .set_status(Status::error(error.to_string())),
                }
                on_delivery(report, record);
                scope.close(&mut record.headers);
            }),
        )
    }

    async fn flush(&self, timeout: Duration) -> Result<(), ClientError> {
        self.producer.flush(timeout).await
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight()
    }

    fn client_id(&self) -> &str {
        self.producer.client_id()
    }
}

fn tag_delivery(span: &SpanRef<'_>, report: &DeliveryReport) {
    span.set_attribute(KeyValue::new(
        tags::KAFKA_TOPIC,
        report.topic.clone(),
    ));
    span.set_attribute(KeyValue::new(
        tags::KAFKA_PARTITION,
        i64::from(report.partition),
    ));
    span.set_attribute(KeyValue::new(tags::KAFKA_OFFSET, report.offset));
}
