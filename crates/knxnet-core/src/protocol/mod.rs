//! KNX Net/IP wire protocol: service bodies, the CEMI link-layer frame, and
//! the binary codec that moves both on and off UDP datagrams.

pub mod body;
pub mod cemi;
pub mod codec;
pub mod header;
pub mod sequence;

pub use body::{Body, ErrorCode, Hpai, ServiceType};
pub use cemi::CemiFrame;
pub use codec::{decode_frame, encode_frame, ProtocolError};
pub use header::FrameHeader;
pub use sequence::SequenceCounter;
