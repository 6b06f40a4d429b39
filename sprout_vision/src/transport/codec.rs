//! Byte framing for the three packets the client sends, and CONNACK validation.

use crate::error::TransportError;

pub const CONNECT: u8 = 0x10;
pub const CONNACK: u8 = 0x20;
pub const PUBLISH: u8 = 0x30;
pub const RETAIN: u8 = 0x01;
pub const DISCONNECT: [u8; 2] = [0xE0, 0x00];

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 0x04;
pub const CLEAN_SESSION: u8 = 0x02;

/// Largest value the four-byte remaining-length field can hold.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Appends `value` as a remaining-length varint: seven bits per byte, least
/// significant group first, high bit set on every byte but the last.
pub fn encode_remaining_length(mut value: usize, out: &mut Vec<u8>) -> Result<(), TransportError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(TransportError::PayloadTooLarge { len: value });
    }
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Appends a length-prefixed (16-bit big-endian) UTF-8 string.
pub fn put_utf8(out: &mut Vec<u8>, text: &str) -> Result<(), TransportError> {
    let len = u16::try_from(text.len()).map_err(|_| TransportError::PayloadTooLarge { len: text.len() })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

fn with_fixed_header(first_byte: u8, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    let mut packet = Vec::with_capacity(body.len() + 5);
    packet.push(first_byte);
    encode_remaining_length(body.len(), &mut packet)?;
    packet.extend_from_slice(&body);
    Ok(packet)
}

pub fn connect_packet(client_id: &str, keep_alive_secs: u16) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::with_capacity(12 + client_id.len());
    put_utf8(&mut body, PROTOCOL_NAME)?;
    body.push(PROTOCOL_LEVEL);
    body.push(CLEAN_SESSION);
    body.extend_from_slice(&keep_alive_secs.to_be_bytes());
    put_utf8(&mut body, client_id)?;
    with_fixed_header(CONNECT, body)
}

/// A QoS 0 PUBLISH: topic, then the payload bytes with no length prefix of their own.
pub fn publish_packet(topic: &str, payload: &[u8], retain: bool) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    put_utf8(&mut body, topic)?;
    body.extend_from_slice(payload);
    let first_byte = if retain { PUBLISH | RETAIN } else { PUBLISH };
    with_fixed_header(first_byte, body)
}

/// Accepts exactly a successful four-byte CONNACK.
pub fn check_connack(bytes: &[u8]) -> Result<(), TransportError> {
    match bytes {
        [CONNACK, remaining, _, 0x00] if *remaining >= 2 => Ok(()),
        [CONNACK, remaining, _, code] if *remaining >= 2 => Err(TransportError::ConnackRejected { return_code: *code }),
        _ => Err(TransportError::MalformedConnack(bytes.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(value: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_remaining_length(value, &mut out).expect("in range");
        out
    }

    #[test]
    fn varint_boundaries() {
        assert_eq!(varint(0), vec![0x00]);
        assert_eq!(varint(127), vec![0x7F]);
        assert_eq!(varint(128), vec![0x80, 0x01]);
        assert_eq!(varint(16_383), vec![0xFF, 0x7F]);
        assert_eq!(varint(16_384), vec![0x80, 0x80, 0x01]);
        assert_eq!(varint(MAX_REMAINING_LENGTH), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn varint_rejects_oversized_lengths() {
        let mut out = Vec::new();
        assert!(matches!(
            encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut out),
            Err(TransportError::PayloadTooLarge { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn connect_packet_layout() {
        let packet = connect_packet("plantvision-client", 60).expect("connect packet");
        let mut expected = vec![0x10, 30, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 18];
        expected.extend_from_slice(b"plantvision-client");
        assert_eq!(packet, expected);
    }

    #[test]
    fn publish_packet_layout() {
        let packet = publish_packet("a/b", b"{}", false).expect("publish packet");
        assert_eq!(packet, vec![0x30, 7, 0x00, 0x03, b'a', b'/', b'b', b'{', b'}']);
        let retained = publish_packet("a/b", b"{}", true).expect("publish packet");
        assert_eq!(retained[0], 0x31);
    }

    #[test]
    fn long_payload_uses_multi_byte_length() {
        let payload = vec![b'x'; 200];
        let packet = publish_packet("t", &payload, false).expect("publish packet");
        // 2 (topic length) + 1 (topic) + 200 = 203 = 0xCB 0x01
        assert_eq!(&packet[..3], &[0x30, 0xCB, 0x01]);
        assert_eq!(packet.len(), 3 + 203);
    }

    #[test]
    fn connack_validation() {
        assert!(check_connack(&[0x20, 0x02, 0x00, 0x00]).is_ok());
        assert!(matches!(
            check_connack(&[0x20, 0x02, 0x00, 0x05]),
            Err(TransportError::ConnackRejected { return_code: 5 })
        ));
        assert!(matches!(check_connack(&[0x30, 0x02, 0x00, 0x00]), Err(TransportError::MalformedConnack(_))));
        assert!(matches!(check_connack(&[0x20, 0x01, 0x00, 0x00]), Err(TransportError::MalformedConnack(_))));
        assert!(matches!(check_connack(&[0x20, 0x02]), Err(TransportError::MalformedConnack(_))));
    }
}
