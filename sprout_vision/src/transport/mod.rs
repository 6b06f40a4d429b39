// THEORY:
// The transport is a deliberately small MQTT 3.1.1 client: CONNECT, PUBLISH at
// QoS 0, DISCONNECT, and nothing else. `codec` builds the bytes; `mqtt` owns the
// single blocking session and its lifecycle. There is no queue, retry, or
// reconnect: a failed write is reported to the caller, who decides whether to
// connect again.

pub mod codec;
pub mod mqtt;

pub use mqtt::MqttClient;
