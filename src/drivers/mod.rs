//! Concrete transport drivers: the HTTP bounce-proxy driver and the MQTT
//! driver. Each defines its own send-path error enum and its own narrow
//! inbound-sink trait (`LongPollSink`, `MqttInboundSink`) rather than
//! sharing one contract — the two transports' receive loops differ enough
//! (long-poll GET batches vs. an MQTT event loop's publish callback) that a
//! shared trait added indirection without a caller that needed it.

pub mod http;
pub mod mqtt;
