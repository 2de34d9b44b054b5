use std::error::Error;
use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::global;
use spanbus_client::{
    Consumer, Producer, ProducerRecord, TracingConsumer, TracingProducer,
};
use spanbus_dev::{Config, MemoryBroker};
use spanbus_telemetry::TelemetryConfig;
use tracing::info;

/// Produces a handful of messages through the traced producer and
/// consumes them back through the traced consumer, all over the
/// in-process broker. Point OTEL_EXPORTER_OTLP_ENDPOINT at a collector
/// to see the linked send/receive spans.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let telemetry = TelemetryConfig::init_from_env()?;
    let _guard = spanbus_telemetry::setup_tracing(&telemetry)?;
    let conf = Config::init_from_env()?;
    info!("starting dev pipeline with {conf:?}");

    let broker = MemoryBroker::new(conf.partitions);
    let producer = TracingProducer::new(
        global::tracer("dev-pipeline"),
        broker.producer("dev-producer"),
    );
    let consumer = TracingConsumer::new(
        global::tracer("dev-pipeline"),
        broker.consumer("dev-consumer"),
    );
    consumer.subscribe(&[&conf.topic]).await?;

    for seq in 0..conf.messages {
        let record = ProducerRecord::with_payload(format!("message-{seq}"))
            .key(format!("key-{seq}"));
        producer.send_with_callback(
            &conf.topic,
            record,
            Box::new(move |report, _record| match report {
                Ok(delivery) => info!(
                    seq,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "delivered"
                ),
                Err(error) => tracing::error!(seq, %error, "delivery failed"),
            }),
        )?;
    }
    producer.flush(Duration::from_secs(1)).await?;

    let poll_timeout = Duration::from_millis(conf.poll_timeout_ms);
    let mut received = 0;
    while received < conf.messages {
        match consumer.poll_traced(poll_timeout).await? {
            Some((mut scope, message)) => {
                {
                    let _processing = scope.attach();
                    info!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        payload = message
                            .payload
                            .as_deref()
                            .map(String::from_utf8_lossy)
                            .unwrap_or_default()
                            .as_ref(),
                        "processing message"
                    );
                }
                scope.close();
                received += 1;
            }
            None => info!("nothing received within {poll_timeout:?}"),
        }
    }
    info!(received, "pipeline done");
    Ok(())
}
