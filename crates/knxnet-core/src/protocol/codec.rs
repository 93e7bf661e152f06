//! Binary codec for whole KNX Net/IP service frames.
//!
//! [`encode_frame`] and [`decode_frame`] transform between a [`Body`] and the
//! exact datagram bytes: fixed 6-byte header (see
//! [`crate::protocol::header`]) followed by the service-specific payload.
//! All multi-byte integers are big-endian. Payload layouts:
//!
//! ```text
//! HPAI                08 01 [ip:4] [port:2]
//! CRI (tunnel)        04 04 [layer:1] 00
//! CRD (tunnel)        04 04 [assigned-address:2]
//! connection header   04 [channel:1] [sequence:1] [status-or-reserved:1]
//! DIB                 [len:1] [type:1] [data:len-2]
//! ```
//!
//! Unknown DIBs inside search/description responses are skipped by their
//! length byte; everything else that is malformed or unrecognized is a hard
//! decode error so the inbox loop can drop the datagram with a warning.

use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::debug;

use crate::domain::address::IndividualAddress;
use crate::protocol::body::{
    Body, ConnectRequestBody, ConnectResponseBody, ConnectionRequestInfo, ConnectionResponseData,
    ConnectionStateRequestBody, ConnectionStateResponseBody, ConnectionType, DescriptionRequestBody,
    DescriptionResponseBody, DeviceInfoDib, DisconnectRequestBody, DisconnectResponseBody,
    ErrorCode, HostProtocol, Hpai, KnxLayer, RoutingBusyBody, RoutingIndicationBody,
    RoutingLostMessageBody, SearchRequestBody, SearchResponseBody, ServiceFamiliesDib,
    ServiceFamily, ServiceType, TunnelingAckBody, TunnelingRequestBody, CONNECTION_HEADER_SIZE,
    DEVICE_INFO_DIB_SIZE, DIB_DEVICE_INFO, DIB_SUPP_SVC_FAMILIES, HEADER_SIZE, HPAI_SIZE,
};
use crate::protocol::cemi::CemiFrame;
use crate::protocol::header::FrameHeader;

/// Maximum bytes of the NUL-padded friendly-name field in a device DIB.
const FRIENDLY_NAME_LEN: usize = 30;

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The service type code in the header is not a recognized value.
    #[error("unknown service type: 0x{0:04X}")]
    UnknownServiceType(u16),

    /// The frame uses a protocol feature this client does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The payload could not be parsed (structure length wrong, value out of
    /// range, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The declared length field does not match the data actually available.
    #[error("length mismatch: declared {declared}, available {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// A field combination that can never be put on the wire.
    #[error("invalid field: {0}")]
    InvalidField(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Body`] into a complete datagram including the 6-byte header.
pub fn encode_frame(body: &Body) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_body(body)?;
    let header = FrameHeader::new(body.service_type(), payload.len())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one complete datagram into a [`Body`].
///
/// The declared total length must equal the datagram size exactly; UDP
/// delivers whole datagrams, so a mismatch means corruption, not framing.
pub fn decode_frame(bytes: &[u8]) -> Result<Body, ProtocolError> {
    let header = FrameHeader::decode(bytes)?;
    if header.total_length as usize != bytes.len() {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.total_length as usize,
            available: bytes.len(),
        });
    }
    decode_body(header.service_type, &bytes[HEADER_SIZE..])
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_body(body: &Body) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match body {
        Body::SearchRequest(b) => encode_hpai(&mut buf, &b.discovery_endpoint),
        Body::SearchResponse(b) => {
            encode_hpai(&mut buf, &b.control_endpoint);
            encode_device_info_dib(&mut buf, &b.device_info);
            encode_service_families_dib(&mut buf, &b.service_families);
        }
        Body::DescriptionRequest(b) => encode_hpai(&mut buf, &b.control_endpoint),
        Body::DescriptionResponse(b) => {
            encode_device_info_dib(&mut buf, &b.device_info);
            encode_service_families_dib(&mut buf, &b.service_families);
        }
        Body::ConnectRequest(b) => {
            encode_hpai(&mut buf, &b.control_endpoint);
            encode_hpai(&mut buf, &b.data_endpoint);
            encode_cri(&mut buf, &b.cri);
        }
        Body::ConnectResponse(b) => encode_connect_response(&mut buf, b)?,
        Body::ConnectionStateRequest(b) => {
            buf.push(b.channel_id);
            buf.push(0x00); // reserved
            encode_hpai(&mut buf, &b.control_endpoint);
        }
        Body::ConnectionStateResponse(b) => {
            buf.push(b.channel_id);
            buf.push(b.status as u8);
        }
        Body::DisconnectRequest(b) => {
            buf.push(b.channel_id);
            buf.push(0x00); // reserved
            encode_hpai(&mut buf, &b.control_endpoint);
        }
        Body::DisconnectResponse(b) => {
            buf.push(b.channel_id);
            buf.push(b.status as u8);
        }
        Body::TunnelingRequest(b) => {
            buf.push(CONNECTION_HEADER_SIZE as u8);
            buf.push(b.channel_id);
            buf.push(b.sequence);
            buf.push(0x00); // reserved
            buf.extend_from_slice(&b.cemi.encode()?);
        }
        Body::TunnelingAck(b) => {
            buf.push(CONNECTION_HEADER_SIZE as u8);
            buf.push(b.channel_id);
            buf.push(b.sequence);
            buf.push(b.status as u8);
        }
        Body::RoutingIndication(b) => buf.extend_from_slice(&b.cemi.encode()?),
        Body::RoutingBusy(b) => {
            buf.push(6); // structure length
            buf.push(b.device_state);
            buf.extend_from_slice(&b.wait_time_ms.to_be_bytes());
            buf.extend_from_slice(&b.control.to_be_bytes());
        }
        Body::RoutingLostMessage(b) => {
            buf.push(4); // structure length
            buf.push(b.device_state);
            buf.extend_from_slice(&b.lost_messages.to_be_bytes());
        }
    }
    Ok(buf)
}

fn encode_connect_response(buf: &mut Vec<u8>, b: &ConnectResponseBody) -> Result<(), ProtocolError> {
    buf.push(b.channel_id);
    buf.push(b.status as u8);
    match (&b.data_endpoint, &b.crd) {
        (Some(endpoint), Some(crd)) => {
            encode_hpai(buf, endpoint);
            encode_crd(buf, crd);
            Ok(())
        }
        // Short error form: channel id and status only.
        (None, None) => Ok(()),
        _ => Err(ProtocolError::InvalidField(
            "connect response requires data endpoint and CRD together".to_string(),
        )),
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_body(service_type: ServiceType, p: &[u8]) -> Result<Body, ProtocolError> {
    match service_type {
        ServiceType::SearchRequest => {
            let (discovery_endpoint, _) = decode_hpai(p, 0)?;
            Ok(Body::SearchRequest(SearchRequestBody { discovery_endpoint }))
        }
        ServiceType::SearchResponse => {
            let (control_endpoint, off) = decode_hpai(p, 0)?;
            let (device_info, service_families) = decode_dibs(p, off)?;
            Ok(Body::SearchResponse(SearchResponseBody {
                control_endpoint,
                device_info,
                service_families,
            }))
        }
        ServiceType::DescriptionRequest => {
            let (control_endpoint, _) = decode_hpai(p, 0)?;
            Ok(Body::DescriptionRequest(DescriptionRequestBody { control_endpoint }))
        }
        ServiceType::DescriptionResponse => {
            let (device_info, service_families) = decode_dibs(p, 0)?;
            Ok(Body::DescriptionResponse(DescriptionResponseBody {
                device_info,
                service_families,
            }))
        }
        ServiceType::ConnectRequest => {
            let (control_endpoint, off) = decode_hpai(p, 0)?;
            let (data_endpoint, off) = decode_hpai(p, off)?;
            let cri = decode_cri(p, off)?;
            Ok(Body::ConnectRequest(ConnectRequestBody {
                control_endpoint,
                data_endpoint,
                cri,
            }))
        }
        ServiceType::ConnectResponse => decode_connect_response(p),
        ServiceType::ConnectionStateRequest => {
            require_len(p, 2, "ConnectionStateRequest")?;
            let (control_endpoint, _) = decode_hpai(p, 2)?;
            Ok(Body::ConnectionStateRequest(ConnectionStateRequestBody {
                channel_id: p[0],
                control_endpoint,
            }))
        }
        ServiceType::ConnectionStateResponse => {
            require_len(p, 2, "ConnectionStateResponse")?;
            Ok(Body::ConnectionStateResponse(ConnectionStateResponseBody {
                channel_id: p[0],
                status: decode_error_code(p[1])?,
            }))
        }
        ServiceType::DisconnectRequest => {
            require_len(p, 2, "DisconnectRequest")?;
            let (control_endpoint, _) = decode_hpai(p, 2)?;
            Ok(Body::DisconnectRequest(DisconnectRequestBody {
                channel_id: p[0],
                control_endpoint,
            }))
        }
        ServiceType::DisconnectResponse => {
            require_len(p, 2, "DisconnectResponse")?;
            Ok(Body::DisconnectResponse(DisconnectResponseBody {
                channel_id: p[0],
                status: decode_error_code(p[1])?,
            }))
        }
        ServiceType::TunnelingRequest => {
            let (channel_id, sequence, _) = decode_connection_header(p, "TunnelingRequest")?;
            let cemi = CemiFrame::decode(&p[CONNECTION_HEADER_SIZE..])?;
            Ok(Body::TunnelingRequest(TunnelingRequestBody {
                channel_id,
                sequence,
                cemi,
            }))
        }
        ServiceType::TunnelingAck => {
            let (channel_id, sequence, status) = decode_connection_header(p, "TunnelingAck")?;
            Ok(Body::TunnelingAck(TunnelingAckBody {
                channel_id,
                sequence,
                status: decode_error_code(status)?,
            }))
        }
        ServiceType::RoutingIndication => {
            let cemi = CemiFrame::decode(p)?;
            Ok(Body::RoutingIndication(RoutingIndicationBody { cemi }))
        }
        ServiceType::RoutingBusy => {
            require_len(p, 6, "RoutingBusy")?;
            Ok(Body::RoutingBusy(RoutingBusyBody {
                device_state: p[1],
                wait_time_ms: read_u16(p, 2),
                control: read_u16(p, 4),
            }))
        }
        ServiceType::RoutingLostMessage => {
            require_len(p, 4, "RoutingLostMessage")?;
            Ok(Body::RoutingLostMessage(RoutingLostMessageBody {
                device_state: p[1],
                lost_messages: read_u16(p, 2),
            }))
        }
    }
}

fn decode_connect_response(p: &[u8]) -> Result<Body, ProtocolError> {
    require_len(p, 2, "ConnectResponse")?;
    let channel_id = p[0];
    let status = decode_error_code(p[1])?;

    // Rejecting gateways send the short two-byte form without endpoint/CRD.
    if p.len() == 2 {
        return Ok(Body::ConnectResponse(ConnectResponseBody {
            channel_id,
            status,
            data_endpoint: None,
            crd: None,
        }));
    }

    let (data_endpoint, off) = decode_hpai(p, 2)?;
    let crd = decode_crd(p, off)?;
    Ok(Body::ConnectResponse(ConnectResponseBody {
        channel_id,
        status,
        data_endpoint: Some(data_endpoint),
        crd: Some(crd),
    }))
}

// ── Support-structure helpers ─────────────────────────────────────────────────

fn encode_hpai(buf: &mut Vec<u8>, hpai: &Hpai) {
    buf.push(HPAI_SIZE as u8);
    buf.push(hpai.protocol as u8);
    buf.extend_from_slice(&hpai.address.octets());
    buf.extend_from_slice(&hpai.port.to_be_bytes());
}

fn decode_hpai(p: &[u8], off: usize) -> Result<(Hpai, usize), ProtocolError> {
    require_len(p, off + HPAI_SIZE, "HPAI")?;
    if p[off] as usize != HPAI_SIZE {
        return Err(ProtocolError::MalformedPayload(format!(
            "HPAI structure length is {}, expected {HPAI_SIZE}",
            p[off]
        )));
    }
    let protocol = HostProtocol::try_from(p[off + 1]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown host protocol code 0x{:02X}", p[off + 1]))
    })?;
    let address = Ipv4Addr::new(p[off + 2], p[off + 3], p[off + 4], p[off + 5]);
    let port = read_u16(p, off + 6);
    Ok((Hpai { protocol, address, port }, off + HPAI_SIZE))
}

fn encode_cri(buf: &mut Vec<u8>, cri: &ConnectionRequestInfo) {
    buf.push(4); // structure length
    buf.push(cri.connection_type as u8);
    buf.push(cri.layer as u8);
    buf.push(0x00); // reserved
}

fn decode_cri(p: &[u8], off: usize) -> Result<ConnectionRequestInfo, ProtocolError> {
    require_len(p, off + 4, "CRI")?;
    if p[off] != 4 {
        return Err(ProtocolError::MalformedPayload(format!(
            "CRI structure length is {}, expected 4",
            p[off]
        )));
    }
    let connection_type = ConnectionType::try_from(p[off + 1]).map_err(|_| {
        ProtocolError::UnsupportedFeature(format!("connection type 0x{:02X}", p[off + 1]))
    })?;
    let layer = KnxLayer::try_from(p[off + 2]).map_err(|_| {
        ProtocolError::UnsupportedFeature(format!("KNX layer 0x{:02X}", p[off + 2]))
    })?;
    Ok(ConnectionRequestInfo { connection_type, layer })
}

fn encode_crd(buf: &mut Vec<u8>, crd: &ConnectionResponseData) {
    buf.push(4); // structure length
    buf.push(crd.connection_type as u8);
    buf.extend_from_slice(&crd.assigned_address.raw().to_be_bytes());
}

fn decode_crd(p: &[u8], off: usize) -> Result<ConnectionResponseData, ProtocolError> {
    require_len(p, off + 4, "CRD")?;
    if p[off] != 4 {
        return Err(ProtocolError::MalformedPayload(format!(
            "CRD structure length is {}, expected 4",
            p[off]
        )));
    }
    let connection_type = ConnectionType::try_from(p[off + 1]).map_err(|_| {
        ProtocolError::UnsupportedFeature(format!("connection type 0x{:02X}", p[off + 1]))
    })?;
    let assigned_address = IndividualAddress::from_raw(read_u16(p, off + 2));
    Ok(ConnectionResponseData {
        connection_type,
        assigned_address,
    })
}

/// Decodes the 4-byte connection header of tunneling bodies.
///
/// Returns (channel id, sequence, fourth byte) — the fourth byte is the
/// status in an ack and reserved in a request.
fn decode_connection_header(p: &[u8], context: &str) -> Result<(u8, u8, u8), ProtocolError> {
    require_len(p, CONNECTION_HEADER_SIZE, context)?;
    if p[0] as usize != CONNECTION_HEADER_SIZE {
        return Err(ProtocolError::MalformedPayload(format!(
            "{context}: connection header length is {}, expected {CONNECTION_HEADER_SIZE}",
            p[0]
        )));
    }
    Ok((p[1], p[2], p[3]))
}

fn decode_error_code(byte: u8) -> Result<ErrorCode, ProtocolError> {
    ErrorCode::try_from(byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown status code 0x{byte:02X}")))
}

// ── DIB helpers ───────────────────────────────────────────────────────────────

fn encode_device_info_dib(buf: &mut Vec<u8>, dib: &DeviceInfoDib) {
    buf.push(DEVICE_INFO_DIB_SIZE as u8);
    buf.push(DIB_DEVICE_INFO);
    buf.push(dib.medium);
    buf.push(dib.device_status);
    buf.extend_from_slice(&dib.address.raw().to_be_bytes());
    buf.extend_from_slice(&dib.project_installation_id.to_be_bytes());
    buf.extend_from_slice(&dib.serial_number);
    buf.extend_from_slice(&dib.routing_multicast.octets());
    buf.extend_from_slice(&dib.mac_address);

    // Friendly name: NUL-padded fixed 30-byte field, truncated if longer.
    let name = dib.friendly_name.as_bytes();
    let n = name.len().min(FRIENDLY_NAME_LEN);
    buf.extend_from_slice(&name[..n]);
    buf.resize(buf.len() + (FRIENDLY_NAME_LEN - n), 0x00);
}

fn encode_service_families_dib(buf: &mut Vec<u8>, dib: &ServiceFamiliesDib) {
    buf.push((2 + 2 * dib.families.len()) as u8);
    buf.push(DIB_SUPP_SVC_FAMILIES);
    for family in &dib.families {
        buf.push(family.id);
        buf.push(family.version);
    }
}

fn decode_device_info_dib(p: &[u8], off: usize) -> Result<DeviceInfoDib, ProtocolError> {
    require_len(p, off + DEVICE_INFO_DIB_SIZE, "device info DIB")?;
    let medium = p[off + 2];
    let device_status = p[off + 3];
    let address = IndividualAddress::from_raw(read_u16(p, off + 4));
    let project_installation_id = read_u16(p, off + 6);
    let mut serial_number = [0u8; 6];
    serial_number.copy_from_slice(&p[off + 8..off + 14]);
    let routing_multicast = Ipv4Addr::new(p[off + 14], p[off + 15], p[off + 16], p[off + 17]);
    let mut mac_address = [0u8; 6];
    mac_address.copy_from_slice(&p[off + 18..off + 24]);

    let name_field = &p[off + 24..off + 24 + FRIENDLY_NAME_LEN];
    let name_end = name_field.iter().position(|&b| b == 0).unwrap_or(FRIENDLY_NAME_LEN);
    let friendly_name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

    Ok(DeviceInfoDib {
        medium,
        device_status,
        address,
        project_installation_id,
        serial_number,
        routing_multicast,
        mac_address,
        friendly_name,
    })
}

fn decode_service_families_dib(p: &[u8], off: usize, len: usize) -> Result<ServiceFamiliesDib, ProtocolError> {
    if len < 2 || (len - 2) % 2 != 0 {
        return Err(ProtocolError::MalformedPayload(format!(
            "service families DIB length {len} is not 2 + 2n"
        )));
    }
    let mut families = Vec::with_capacity((len - 2) / 2);
    let mut pos = off + 2;
    while pos < off + len {
        families.push(ServiceFamily {
            id: p[pos],
            version: p[pos + 1],
        });
        pos += 2;
    }
    Ok(ServiceFamiliesDib { families })
}

/// Walks the DIB sequence of a search/description response.
///
/// The device-information DIB is mandatory; the service-families DIB
/// defaults to empty; unknown DIB types are skipped by their length byte.
fn decode_dibs(p: &[u8], mut off: usize) -> Result<(DeviceInfoDib, ServiceFamiliesDib), ProtocolError> {
    let mut device_info = None;
    let mut service_families = ServiceFamiliesDib::default();

    while off < p.len() {
        require_len(p, off + 2, "DIB header")?;
        let len = p[off] as usize;
        if len < 2 {
            return Err(ProtocolError::MalformedPayload(format!(
                "DIB structure length {len} is below the 2-byte header"
            )));
        }
        require_len(p, off + len, "DIB body")?;
        match p[off + 1] {
            DIB_DEVICE_INFO => {
                if len != DEVICE_INFO_DIB_SIZE {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "device info DIB length is {len}, expected {DEVICE_INFO_DIB_SIZE}"
                    )));
                }
                device_info = Some(decode_device_info_dib(p, off)?);
            }
            DIB_SUPP_SVC_FAMILIES => {
                service_families = decode_service_families_dib(p, off, len)?;
            }
            other => {
                debug!(dib_type = other, len, "skipping unknown DIB");
            }
        }
        off += len;
    }

    let device_info = device_info.ok_or_else(|| {
        ProtocolError::MalformedPayload("response carries no device info DIB".to_string())
    })?;
    Ok((device_info, service_families))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
