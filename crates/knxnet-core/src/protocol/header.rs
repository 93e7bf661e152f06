//! Codec for the fixed 6-byte KNX Net/IP frame header.
//!
//! Every service frame starts with the same prefix:
//!
//! ```text
//! [header-len:1 = 0x06][version:1 = 0x10][service-type:2][total-length:2]
//! ```
//!
//! `total-length` counts the header itself plus the body, big-endian. A
//! frame whose declared total length disagrees with the datagram size is
//! rejected before any body parsing happens.

use crate::protocol::body::{ServiceType, HEADER_SIZE, PROTOCOL_VERSION};
use crate::protocol::codec::ProtocolError;

/// Decoded outer frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub service_type: ServiceType,
    /// Header length plus body length in bytes.
    pub total_length: u16,
}

impl FrameHeader {
    /// Builds a header for a body of `body_len` bytes.
    pub fn new(service_type: ServiceType, body_len: usize) -> Result<Self, ProtocolError> {
        let total = HEADER_SIZE + body_len;
        if total > u16::MAX as usize {
            return Err(ProtocolError::InvalidField(format!(
                "body of {body_len} bytes exceeds the frame length field"
            )));
        }
        Ok(Self {
            service_type,
            total_length: total as u16,
        })
    }

    /// Number of body bytes the header announces.
    pub fn body_length(&self) -> usize {
        self.total_length as usize - HEADER_SIZE
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let st = (self.service_type as u16).to_be_bytes();
        let len = self.total_length.to_be_bytes();
        [
            HEADER_SIZE as u8,
            PROTOCOL_VERSION,
            st[0],
            st[1],
            len[0],
            len[1],
        ]
    }

    /// Decodes the header from the start of a datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        if bytes[0] as usize != HEADER_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "header length byte is 0x{:02X}, expected 0x06",
                bytes[0]
            )));
        }
        if bytes[1] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedFeature(format!(
                "protocol version 0x{:02X}",
                bytes[1]
            )));
        }
        let raw_type = u16::from_be_bytes([bytes[2], bytes[3]]);
        let service_type = ServiceType::try_from(raw_type)
            .map_err(|_| ProtocolError::UnknownServiceType(raw_type))?;
        let total_length = u16::from_be_bytes([bytes[4], bytes[5]]);
        if (total_length as usize) < HEADER_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "total length {total_length} is shorter than the header"
            )));
        }
        Ok(Self {
            service_type,
            total_length,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encodes_canonical_bytes() {
        // Arrange / Act
        let header = FrameHeader::new(ServiceType::TunnelingRequest, 15).unwrap();
        let bytes = header.encode();

        // Assert: 06 10 | 04 20 | 00 15
        assert_eq!(bytes, [0x06, 0x10, 0x04, 0x20, 0x00, 0x15]);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(ServiceType::ConnectResponse, 18).unwrap();
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.body_length(), 18);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = FrameHeader::decode(&[0x06, 0x10, 0x02]).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientData { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_prefix() {
        // Wrong header length byte.
        let err = FrameHeader::decode(&[0x08, 0x10, 0x02, 0x05, 0x00, 0x06]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload(_)));

        // Wrong protocol version.
        let err = FrameHeader::decode(&[0x06, 0x20, 0x02, 0x05, 0x00, 0x06]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedFeature(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_service_type() {
        let err = FrameHeader::decode(&[0x06, 0x10, 0x02, 0x99, 0x00, 0x06]).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownServiceType(0x0299));
    }

    #[test]
    fn test_decode_rejects_total_length_below_header_size() {
        let err = FrameHeader::decode(&[0x06, 0x10, 0x02, 0x05, 0x00, 0x04]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload(_)));
    }
}
