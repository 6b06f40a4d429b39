use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::codec::{DISCONNECT, check_connack, connect_packet, publish_packet};
use crate::config::MqttConfig;
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);

/// A publish-only MQTT 3.1.1 session over one blocking byte stream.
///
/// Generic over the stream so the protocol can run over anything that reads and
/// writes; `connect` opens a TCP stream, `connect_over` adopts an existing one.
pub struct MqttClient<S: Read + Write = TcpStream> {
    host: String,
    port: u16,
    client_id: String,
    keep_alive_secs: u16,
    stream: Option<S>,
}

impl MqttClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::unconnected(host, port)
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        let mut client = Self::new(config.host.clone(), config.port);
        client.client_id = config.client_id.clone();
        client.keep_alive_secs = config.keep_alive_secs;
        client
    }

    /// Resolves the broker, opens a fresh TCP session and performs the handshake.
    /// Any previous session is closed first.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect();

        let resolve_error = || TransportError::Resolve { host: self.host.clone(), port: self.port };
        let addrs: Vec<_> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| resolve_error())?
            .collect();
        if addrs.is_empty() {
            return Err(resolve_error());
        }

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(CONNACK_TIMEOUT))?;
                    stream.set_nodelay(true)?;
                    return self.connect_over(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(TransportError::Connect {
            host: self.host.clone(),
            port: self.port,
            source: last_error.unwrap_or_else(|| std::io::Error::other("no address to connect to")),
        })
    }
}

impl<S: Read + Write> MqttClient<S> {
    pub fn unconnected(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "plantvision-client".to_string(),
            keep_alive_secs: 60,
            stream: None,
        }
    }

    /// Sends CONNECT over `stream` and waits for a successful CONNACK. The session
    /// is only kept if the broker accepts it.
    pub fn connect_over(&mut self, mut stream: S) -> Result<(), TransportError> {
        self.disconnect();

        let packet = connect_packet(&self.client_id, self.keep_alive_secs)?;
        stream.write_all(&packet)?;
        stream.flush()?;

        let mut connack = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut connack) {
            warn!(error = %e, "no CONNACK from broker");
            return Err(TransportError::Io(e));
        }
        check_connack(&connack)?;

        info!(host = %self.host, port = self.port, client_id = %self.client_id, "connected to broker");
        self.stream = Some(stream);
        Ok(())
    }

    /// Publishes at QoS 0. `qos` is accepted for interface compatibility and ignored.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if qos > 0 {
            debug!(qos, "only QoS 0 is supported; sending at QoS 0");
        }
        let packet = publish_packet(topic, payload, retain)?;
        stream.write_all(&packet)?;
        stream.flush()?;
        debug!(topic, bytes = payload.len(), "published");
        Ok(())
    }

    /// Best-effort DISCONNECT, then the stream is dropped (and closed).
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.write_all(&DISCONNECT);
            let _ = stream.flush();
            debug!(host = %self.host, "disconnected from broker");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }
}

impl<S: Read + Write> Drop for MqttClient<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// In-memory stream: reads from a canned reply, records every write.
    struct MockStream {
        reply: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
        io_calls: Arc<Mutex<usize>>,
        fail_writes: bool,
    }

    impl MockStream {
        fn new(reply: &[u8]) -> Self {
            Self {
                reply: Cursor::new(reply.to_vec()),
                written: Arc::new(Mutex::new(Vec::new())),
                io_calls: Arc::new(Mutex::new(0)),
                fail_writes: false,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            *self.io_calls.lock().expect("lock") += 1;
            self.reply.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            *self.io_calls.lock().expect("lock") += 1;
            if self.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
            }
            self.written.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    const ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    #[test]
    fn publish_without_connect_is_rejected_without_io() {
        let mut client: MqttClient<MockStream> = MqttClient::unconnected("localhost", 1883);
        let result = client.publish("topic", b"payload", 0, false);
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(!client.is_connected());
    }

    #[test]
    fn handshake_then_publish_then_disconnect() {
        let stream = MockStream::new(&ACCEPTED);
        let written = Arc::clone(&stream.written);
        let mut client = MqttClient::unconnected("localhost", 1883);
        client.connect_over(stream).expect("broker accepts");
        assert!(client.is_connected());

        client.publish("a/b", b"{}", 1, false).expect("publish succeeds");
        client.disconnect();
        assert!(!client.is_connected());

        let bytes = written.lock().expect("lock").clone();
        let connect = connect_packet("plantvision-client", 60).expect("connect packet");
        let publish = publish_packet("a/b", b"{}", false).expect("publish packet");
        let mut expected = connect.clone();
        expected.extend_from_slice(&publish);
        expected.extend_from_slice(&DISCONNECT);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn rejected_connack_leaves_session_closed() {
        let mut client = MqttClient::unconnected("localhost", 1883);
        let result = client.connect_over(MockStream::new(&[0x20, 0x02, 0x00, 0x04]));
        assert!(matches!(result, Err(TransportError::ConnackRejected { return_code: 4 })));
        assert!(!client.is_connected());
        assert!(matches!(client.publish("t", b"", 0, false), Err(TransportError::NotConnected)));
    }

    #[test]
    fn short_connack_is_a_failure() {
        let mut client = MqttClient::unconnected("localhost", 1883);
        assert!(client.connect_over(MockStream::new(&[0x20, 0x02])).is_err());
        assert!(!client.is_connected());
    }

    #[test]
    fn write_failure_is_reported_and_not_retried() {
        let mut stream = MockStream::new(&ACCEPTED);
        let calls = Arc::clone(&stream.io_calls);
        let mut client = MqttClient::unconnected("localhost", 1883);
        stream.fail_writes = false;
        client.connect_over(stream).expect("broker accepts");

        let before = *calls.lock().expect("lock");
        if let Some(s) = client.stream.as_mut() {
            s.fail_writes = true;
        }
        assert!(matches!(client.publish("t", b"x", 0, false), Err(TransportError::Io(_))));
        assert_eq!(*calls.lock().expect("lock"), before + 1);
    }
}
