//! All KNX Net/IP service body types.
//!
//! Every datagram on the wire is one service frame: a fixed 6-byte header
//! (see [`crate::protocol::codec`]) followed by one of the bodies defined
//! here. Bodies group into four service families:
//!
//! ```text
//! discovery    SEARCH_REQUEST / SEARCH_RESPONSE                (multicast)
//! description  DESCRIPTION_REQUEST / DESCRIPTION_RESPONSE
//! tunneling    CONNECT / CONNECTIONSTATE / DISCONNECT / TUNNELING_*
//! routing      ROUTING_INDICATION / ROUTING_BUSY / ROUTING_LOST
//! ```
//!
//! Which communicator handles a body is not decided by its type alone but
//! by its *channel affinity* ([`Body::affinity`]): connect and
//! connection-state traffic belongs to the control channel, tunneling
//! requests/acks to the data channel, search and routing bodies to the
//! multicast channels. The affinity bitmask is what
//! `ChannelCommunicator::is_compatible` consults on both the inbound and
//! the outbound path.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::domain::address::IndividualAddress;
use crate::protocol::cemi::CemiFrame;

// ── Protocol constants ────────────────────────────────────────────────────────

/// KNX Net/IP protocol version byte (1.0).
pub const PROTOCOL_VERSION: u8 = 0x10;

/// Size of the outer frame header in bytes (also its first byte on the wire).
pub const HEADER_SIZE: usize = 6;

/// Default KNX Net/IP UDP port.
pub const DEFAULT_PORT: u16 = 3671;

/// System-setup multicast group used by discovery and routing.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// Wire size of a Host Protocol Address Information block.
pub const HPAI_SIZE: usize = 8;

/// Wire size of the connection header preceding tunneling payloads.
pub const CONNECTION_HEADER_SIZE: usize = 4;

// ── Service type codes ────────────────────────────────────────────────────────

/// All service type codes understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServiceType {
    // Core service family (0x02xx)
    SearchRequest = 0x0201,
    SearchResponse = 0x0202,
    DescriptionRequest = 0x0203,
    DescriptionResponse = 0x0204,
    ConnectRequest = 0x0205,
    ConnectResponse = 0x0206,
    ConnectionStateRequest = 0x0207,
    ConnectionStateResponse = 0x0208,
    DisconnectRequest = 0x0209,
    DisconnectResponse = 0x020A,
    // Tunneling service family (0x04xx)
    TunnelingRequest = 0x0420,
    TunnelingAck = 0x0421,
    // Routing service family (0x05xx)
    RoutingIndication = 0x0530,
    RoutingLostMessage = 0x0531,
    RoutingBusy = 0x0532,
}

impl TryFrom<u16> for ServiceType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0201 => Ok(ServiceType::SearchRequest),
            0x0202 => Ok(ServiceType::SearchResponse),
            0x0203 => Ok(ServiceType::DescriptionRequest),
            0x0204 => Ok(ServiceType::DescriptionResponse),
            0x0205 => Ok(ServiceType::ConnectRequest),
            0x0206 => Ok(ServiceType::ConnectResponse),
            0x0207 => Ok(ServiceType::ConnectionStateRequest),
            0x0208 => Ok(ServiceType::ConnectionStateResponse),
            0x0209 => Ok(ServiceType::DisconnectRequest),
            0x020A => Ok(ServiceType::DisconnectResponse),
            0x0420 => Ok(ServiceType::TunnelingRequest),
            0x0421 => Ok(ServiceType::TunnelingAck),
            0x0530 => Ok(ServiceType::RoutingIndication),
            0x0531 => Ok(ServiceType::RoutingLostMessage),
            0x0532 => Ok(ServiceType::RoutingBusy),
            _ => Err(()),
        }
    }
}

// ── Channel affinity ──────────────────────────────────────────────────────────

/// Channel affinity bitmask flags used by [`Body::affinity`].
///
/// A communicator accepts a body when the intersection of the body's mask
/// and the communicator's accepted mask is non-empty. The NAT-mode
/// communicator accepts `CONTROL | DATA` over a single socket.
pub mod affinity {
    /// Connect, connection-state, and disconnect traffic.
    pub const CONTROL: u8 = 1 << 0;
    /// Tunneling requests and acknowledgements.
    pub const DATA: u8 = 1 << 1;
    /// Search and routing traffic on the system-setup multicast group.
    pub const MULTICAST: u8 = 1 << 2;
    /// Description requests/responses on their own short-lived channel.
    pub const DESCRIPTION: u8 = 1 << 3;
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Connection status codes carried in response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    HostProtocolType = 0x01,
    VersionNotSupported = 0x02,
    SequenceNumber = 0x04,
    ConnectionId = 0x21,
    ConnectionType = 0x22,
    ConnectionOption = 0x23,
    NoMoreConnections = 0x24,
    DataConnection = 0x26,
    KnxConnection = 0x27,
    TunnelingLayer = 0x29,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::NoError
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ErrorCode::NoError),
            0x01 => Ok(ErrorCode::HostProtocolType),
            0x02 => Ok(ErrorCode::VersionNotSupported),
            0x04 => Ok(ErrorCode::SequenceNumber),
            0x21 => Ok(ErrorCode::ConnectionId),
            0x22 => Ok(ErrorCode::ConnectionType),
            0x23 => Ok(ErrorCode::ConnectionOption),
            0x24 => Ok(ErrorCode::NoMoreConnections),
            0x26 => Ok(ErrorCode::DataConnection),
            0x27 => Ok(ErrorCode::KnxConnection),
            0x29 => Ok(ErrorCode::TunnelingLayer),
            _ => Err(()),
        }
    }
}

// ── Support structures ────────────────────────────────────────────────────────

/// Host protocol code inside an HPAI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostProtocol {
    Ipv4Udp = 0x01,
    Ipv4Tcp = 0x02,
}

impl TryFrom<u8> for HostProtocol {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(HostProtocol::Ipv4Udp),
            0x02 => Ok(HostProtocol::Ipv4Tcp),
            _ => Err(()),
        }
    }
}

/// Host Protocol Address Information: one UDP/TCP endpoint on the wire.
///
/// `0.0.0.0:0` is the NAT-traversal form: it tells the gateway to reply to
/// the source address of the datagram instead of the advertised endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    pub protocol: HostProtocol,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Hpai {
    /// UDP endpoint from a concrete socket address.
    pub fn udp(addr: SocketAddrV4) -> Self {
        Self {
            protocol: HostProtocol::Ipv4Udp,
            address: *addr.ip(),
            port: addr.port(),
        }
    }

    /// The NAT-traversal wildcard endpoint.
    pub fn unbound() -> Self {
        Self {
            protocol: HostProtocol::Ipv4Udp,
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

/// Connection type requested in a CRI / confirmed in a CRD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionType {
    DeviceManagement = 0x03,
    Tunnel = 0x04,
}

impl TryFrom<u8> for ConnectionType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x03 => Ok(ConnectionType::DeviceManagement),
            0x04 => Ok(ConnectionType::Tunnel),
            _ => Err(()),
        }
    }
}

/// KNX layer requested for a tunnel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KnxLayer {
    /// Link-layer tunnel: the normal mode for group communication.
    LinkLayer = 0x02,
    /// Raw frames, unfiltered.
    Raw = 0x04,
    /// Bus monitor mode (receive-only).
    BusMonitor = 0x80,
}

impl TryFrom<u8> for KnxLayer {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(KnxLayer::LinkLayer),
            0x04 => Ok(KnxLayer::Raw),
            0x80 => Ok(KnxLayer::BusMonitor),
            _ => Err(()),
        }
    }
}

/// Connection Request Information block of a CONNECT_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequestInfo {
    pub connection_type: ConnectionType,
    pub layer: KnxLayer,
}

impl ConnectionRequestInfo {
    /// The standard link-layer tunnel request.
    pub const fn tunnel_link_layer() -> Self {
        Self {
            connection_type: ConnectionType::Tunnel,
            layer: KnxLayer::LinkLayer,
        }
    }
}

impl Default for ConnectionRequestInfo {
    fn default() -> Self {
        Self::tunnel_link_layer()
    }
}

/// Connection Response Data block of a CONNECT_RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponseData {
    pub connection_type: ConnectionType,
    /// Individual address the gateway assigned to this tunnel endpoint.
    pub assigned_address: IndividualAddress,
}

// ── Description Information Blocks ────────────────────────────────────────────

/// DIB type code: device hardware information.
pub const DIB_DEVICE_INFO: u8 = 0x01;
/// DIB type code: supported service families.
pub const DIB_SUPP_SVC_FAMILIES: u8 = 0x02;

/// Wire size of the device-information DIB including its 2-byte DIB header.
pub const DEVICE_INFO_DIB_SIZE: usize = 54;

/// Service family identifiers used in [`ServiceFamily::id`].
pub mod service_family {
    pub const CORE: u8 = 0x02;
    pub const DEVICE_MANAGEMENT: u8 = 0x03;
    pub const TUNNELING: u8 = 0x04;
    pub const ROUTING: u8 = 0x05;
}

/// Device hardware DIB carried in search and description responses.
///
/// `medium` and `device_status` are kept as raw bytes: they are
/// informational only, and gateways in the field report vendor-specific
/// values the client must not choke on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfoDib {
    /// KNX medium code (0x02 = TP1, 0x20 = IP, ...).
    pub medium: u8,
    /// Device status byte; bit 0 = programming mode active.
    pub device_status: u8,
    /// Individual address of the gateway itself.
    pub address: IndividualAddress,
    pub project_installation_id: u16,
    pub serial_number: [u8; 6],
    /// Multicast group the device routes on (0.0.0.0 if routing-incapable).
    pub routing_multicast: Ipv4Addr,
    pub mac_address: [u8; 6],
    /// Human-readable device name (at most 30 bytes on the wire, NUL padded).
    pub friendly_name: String,
}

/// One supported service family and its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFamily {
    pub id: u8,
    pub version: u8,
}

/// Supported-service-families DIB.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceFamiliesDib {
    pub families: Vec<ServiceFamily>,
}

impl ServiceFamiliesDib {
    /// Whether the device advertises the given family (any version).
    pub fn supports(&self, id: u8) -> bool {
        self.families.iter().any(|f| f.id == id)
    }
}

// ── Per-service body structs ──────────────────────────────────────────────────

/// SEARCH_REQUEST (0x0201): multicast "who is out there".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequestBody {
    /// Unicast endpoint the responses should be sent to.
    pub discovery_endpoint: Hpai,
}

/// SEARCH_RESPONSE (0x0202): one gateway announcing itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponseBody {
    /// Control endpoint to use when connecting to this gateway.
    pub control_endpoint: Hpai,
    pub device_info: DeviceInfoDib,
    pub service_families: ServiceFamiliesDib,
}

/// DESCRIPTION_REQUEST (0x0203): ask one gateway to describe itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionRequestBody {
    pub control_endpoint: Hpai,
}

/// DESCRIPTION_RESPONSE (0x0204).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionResponseBody {
    pub device_info: DeviceInfoDib,
    pub service_families: ServiceFamiliesDib,
}

/// CONNECT_REQUEST (0x0205): open a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequestBody {
    pub control_endpoint: Hpai,
    pub data_endpoint: Hpai,
    pub cri: ConnectionRequestInfo,
}

/// CONNECT_RESPONSE (0x0206).
///
/// On rejection (`status != NoError`) gateways send the short two-byte
/// form without endpoint and CRD; both forms decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponseBody {
    /// Channel id assigned by the gateway; all subsequent control and data
    /// bodies for this tunnel carry it.
    pub channel_id: u8,
    pub status: ErrorCode,
    pub data_endpoint: Option<Hpai>,
    pub crd: Option<ConnectionResponseData>,
}

/// CONNECTIONSTATE_REQUEST (0x0207): the heartbeat probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateRequestBody {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

/// CONNECTIONSTATE_RESPONSE (0x0208).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateResponseBody {
    pub channel_id: u8,
    pub status: ErrorCode,
}

/// DISCONNECT_REQUEST (0x0209): sent by either side to tear the tunnel down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRequestBody {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

/// DISCONNECT_RESPONSE (0x020A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectResponseBody {
    pub channel_id: u8,
    pub status: ErrorCode,
}

/// TUNNELING_REQUEST (0x0420): one CEMI frame through the tunnel.
///
/// Carried in both directions: client→gateway for outgoing bus traffic,
/// gateway→client for indications and confirmations. Every request must be
/// answered with a [`TunnelingAckBody`] mirroring its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingRequestBody {
    pub channel_id: u8,
    /// Per-direction wrapping sequence counter (0–255).
    pub sequence: u8,
    pub cemi: CemiFrame,
}

/// TUNNELING_ACK (0x0421).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingAckBody {
    pub channel_id: u8,
    pub sequence: u8,
    pub status: ErrorCode,
}

/// ROUTING_INDICATION (0x0530): one CEMI frame on the multicast group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingIndicationBody {
    pub cemi: CemiFrame,
}

/// ROUTING_BUSY (0x0532): a router asking senders to back off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingBusyBody {
    pub device_state: u8,
    /// Milliseconds the sender should pause.
    pub wait_time_ms: u16,
    /// Selects which senders the busy applies to (0 = all).
    pub control: u16,
}

/// ROUTING_LOST_MESSAGE (0x0531): a router reporting dropped frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingLostMessageBody {
    pub device_state: u8,
    pub lost_messages: u16,
}

// ── Top-level body enum ───────────────────────────────────────────────────────

/// All valid KNX Net/IP bodies, discriminated by service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    SearchRequest(SearchRequestBody),
    SearchResponse(SearchResponseBody),
    DescriptionRequest(DescriptionRequestBody),
    DescriptionResponse(DescriptionResponseBody),
    ConnectRequest(ConnectRequestBody),
    ConnectResponse(ConnectResponseBody),
    ConnectionStateRequest(ConnectionStateRequestBody),
    ConnectionStateResponse(ConnectionStateResponseBody),
    DisconnectRequest(DisconnectRequestBody),
    DisconnectResponse(DisconnectResponseBody),
    TunnelingRequest(TunnelingRequestBody),
    TunnelingAck(TunnelingAckBody),
    RoutingIndication(RoutingIndicationBody),
    RoutingBusy(RoutingBusyBody),
    RoutingLostMessage(RoutingLostMessageBody),
}

impl Body {
    /// Returns the [`ServiceType`] discriminant for this body.
    pub fn service_type(&self) -> ServiceType {
        match self {
            Body::SearchRequest(_) => ServiceType::SearchRequest,
            Body::SearchResponse(_) => ServiceType::SearchResponse,
            Body::DescriptionRequest(_) => ServiceType::DescriptionRequest,
            Body::DescriptionResponse(_) => ServiceType::DescriptionResponse,
            Body::ConnectRequest(_) => ServiceType::ConnectRequest,
            Body::ConnectResponse(_) => ServiceType::ConnectResponse,
            Body::ConnectionStateRequest(_) => ServiceType::ConnectionStateRequest,
            Body::ConnectionStateResponse(_) => ServiceType::ConnectionStateResponse,
            Body::DisconnectRequest(_) => ServiceType::DisconnectRequest,
            Body::DisconnectResponse(_) => ServiceType::DisconnectResponse,
            Body::TunnelingRequest(_) => ServiceType::TunnelingRequest,
            Body::TunnelingAck(_) => ServiceType::TunnelingAck,
            Body::RoutingIndication(_) => ServiceType::RoutingIndication,
            Body::RoutingBusy(_) => ServiceType::RoutingBusy,
            Body::RoutingLostMessage(_) => ServiceType::RoutingLostMessage,
        }
    }

    /// Returns the channel-affinity bitmask driving subscriber routing.
    pub fn affinity(&self) -> u8 {
        match self {
            Body::SearchRequest(_) | Body::SearchResponse(_) => affinity::MULTICAST,
            Body::DescriptionRequest(_) | Body::DescriptionResponse(_) => affinity::DESCRIPTION,
            Body::ConnectRequest(_)
            | Body::ConnectResponse(_)
            | Body::ConnectionStateRequest(_)
            | Body::ConnectionStateResponse(_)
            | Body::DisconnectRequest(_)
            | Body::DisconnectResponse(_) => affinity::CONTROL,
            Body::TunnelingRequest(_) | Body::TunnelingAck(_) => affinity::DATA,
            Body::RoutingIndication(_) | Body::RoutingBusy(_) | Body::RoutingLostMessage(_) => {
                affinity::MULTICAST
            }
        }
    }
}

impl From<SearchRequestBody> for Body {
    fn from(b: SearchRequestBody) -> Self {
        Body::SearchRequest(b)
    }
}

impl From<SearchResponseBody> for Body {
    fn from(b: SearchResponseBody) -> Self {
        Body::SearchResponse(b)
    }
}

impl From<DescriptionRequestBody> for Body {
    fn from(b: DescriptionRequestBody) -> Self {
        Body::DescriptionRequest(b)
    }
}

impl From<DescriptionResponseBody> for Body {
    fn from(b: DescriptionResponseBody) -> Self {
        Body::DescriptionResponse(b)
    }
}

impl From<ConnectRequestBody> for Body {
    fn from(b: ConnectRequestBody) -> Self {
        Body::ConnectRequest(b)
    }
}

impl From<ConnectResponseBody> for Body {
    fn from(b: ConnectResponseBody) -> Self {
        Body::ConnectResponse(b)
    }
}

impl From<ConnectionStateRequestBody> for Body {
    fn from(b: ConnectionStateRequestBody) -> Self {
        Body::ConnectionStateRequest(b)
    }
}

impl From<ConnectionStateResponseBody> for Body {
    fn from(b: ConnectionStateResponseBody) -> Self {
        Body::ConnectionStateResponse(b)
    }
}

impl From<DisconnectRequestBody> for Body {
    fn from(b: DisconnectRequestBody) -> Self {
        Body::DisconnectRequest(b)
    }
}

impl From<DisconnectResponseBody> for Body {
    fn from(b: DisconnectResponseBody) -> Self {
        Body::DisconnectResponse(b)
    }
}

impl From<TunnelingRequestBody> for Body {
    fn from(b: TunnelingRequestBody) -> Self {
        Body::TunnelingRequest(b)
    }
}

impl From<TunnelingAckBody> for Body {
    fn from(b: TunnelingAckBody) -> Self {
        Body::TunnelingAck(b)
    }
}

impl From<RoutingIndicationBody> for Body {
    fn from(b: RoutingIndicationBody) -> Self {
        Body::RoutingIndication(b)
    }
}

impl From<RoutingBusyBody> for Body {
    fn from(b: RoutingBusyBody) -> Self {
        Body::RoutingBusy(b)
    }
}

impl From<RoutingLostMessageBody> for Body {
    fn from(b: RoutingLostMessageBody) -> Self {
        Body::RoutingLostMessage(b)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
