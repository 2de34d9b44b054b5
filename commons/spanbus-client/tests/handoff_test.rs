mod common;

use std::time::Duration;

use opentelemetry::trace::FutureExt;
use spanbus_client::{
    Headers, Producer, ProducerRecord, ReceivedMessage, TracingConsumer,
    TracingProducer, tags,
};

use common::{
    MockConsumer, MockProducer, delivered_message, span_named, test_tracer,
};

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn consuming_a_produced_record_links_back_to_the_send_span() {
    let (tracer, _provider, exporter) = test_tracer();
    let producer = TracingProducer::new(tracer.clone(), MockProducer::new());

    let mut record = ProducerRecord::with_payload("hello");
    let report = producer.send("orders", &mut record).await.unwrap();

    let consumer = TracingConsumer::new(
        tracer,
        MockConsumer::with_messages([ReceivedMessage {
            topic: report.topic.clone(),
            partition: report.partition,
            offset: report.offset,
            key: record.key.clone(),
            payload: record.payload.clone(),
            headers: Some(record.headers.clone()),
        }]),
    );

    let (mut scope, _message) =
        consumer.poll_traced(POLL).await.unwrap().unwrap();
    scope.close();

    let spans = exporter.get_finished_spans().unwrap();
    let send = span_named(&spans, tags::SPAN_NAME_SEND);
    let receive = span_named(&spans, tags::SPAN_NAME_RECEIVE);

    let link = &receive.links.links[0];
    assert_eq!(link.span_context.trace_id(), send.span_context.trace_id());
    assert_eq!(link.span_context.span_id(), send.span_context.span_id());
    assert_ne!(
        receive.span_context.trace_id(),
        send.span_context.trace_id()
    );
}

#[tokio::test]
async fn relaying_under_the_receive_scope_continues_its_trace() {
    let (tracer, _provider, exporter) = test_tracer();
    let consumer = TracingConsumer::new(
        tracer.clone(),
        MockConsumer::with_messages([delivered_message(
            "inbound",
            1,
            Some(Headers::new()),
        )]),
    );
    let producer = TracingProducer::new(tracer, MockProducer::new());

    let (mut scope, message) =
        consumer.poll_traced(POLL).await.unwrap().unwrap();

    let mut relayed = ProducerRecord {
        key: message.key.clone(),
        payload: message.payload.clone(),
        headers: Headers::new(),
    };
    producer
        .send("outbound", &mut relayed)
        .with_context(scope.context().clone())
        .await
        .unwrap();
    scope.close();

    let spans = exporter.get_finished_spans().unwrap();
    let receive = span_named(&spans, tags::SPAN_NAME_RECEIVE);
    let send = span_named(&spans, tags::SPAN_NAME_SEND);
    assert_eq!(send.span_context.trace_id(), receive.span_context.trace_id());
    assert_eq!(send.parent_span_id, receive.span_context.span_id());
}
