//! # knxnet-core
//!
//! Shared library for the KNX Net/IP client containing the wire codec,
//! bus addressing, the CEMI link-layer frame, and datapoint-type
//! conversions.
//!
//! This crate holds everything that can be expressed without a socket:
//!
//! - **`protocol`** – service frames as typed [`protocol::Body`] values, the
//!   6-byte outer header, the bit-packed CEMI frame, and the codec between
//!   them and datagram bytes.
//!
//! - **`domain`** – individual (`1.1.23`) and group (`1/2/3`) bus addresses
//!   with their bit-field layouts.
//!
//! - **`dpt`** – datapoint type encodings that map group payload bytes to
//!   Rust values (switch bits, scaled counts, 16-bit floats).
//!
//! The client crate layers sockets, retry, and connection supervision on
//! top of these types.

pub mod domain;
pub mod dpt;
pub mod protocol;

pub use domain::address::{AddressError, GroupAddress, IndividualAddress, KnxAddress};
pub use protocol::cemi::CemiFrame;
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::{Body, ErrorCode, ServiceType};
