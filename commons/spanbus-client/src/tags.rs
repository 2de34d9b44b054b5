//! Span names and attribute keys written by the tracing decorators.

/// Name of the span opened around an outbound send.
pub const SPAN_NAME_SEND: &str = "send";
/// Name of the span opened when a message is received.
pub const SPAN_NAME_RECEIVE: &str = "receive";

/// Destination topic of an outbound message, tagged before the send.
pub const MESSAGE_BUS_DESTINATION: &str = "message_bus.destination";
/// Topic the message was delivered to or read from.
pub const KAFKA_TOPIC: &str = "kafka.topic";
/// Partition the message was delivered to or read from.
pub const KAFKA_PARTITION: &str = "kafka.partition";
/// Offset of the message within its partition.
pub const KAFKA_OFFSET: &str = "kafka.offset";
