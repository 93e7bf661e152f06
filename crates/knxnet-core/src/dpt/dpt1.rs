//! DPT 1.xxx: 1-bit boolean (switch, enable, up/down, ...).
//!
//! The single significant bit travels inline in the low bits of the APCI
//! byte, so the encoded payload is one byte below the inline threshold.

use crate::dpt::DptError;

/// Encodes a boolean as a one-byte group payload.
pub fn encode(value: bool) -> Vec<u8> {
    vec![value as u8]
}

/// Decodes a one-byte group payload as a boolean.
///
/// Only `0x00` and `0x01` are valid; other bit patterns mean the sender
/// used a different DPT for this group address.
pub fn decode(payload: &[u8]) -> Result<bool, DptError> {
    if payload.len() != 1 {
        return Err(DptError::WrongLength {
            expected: 1,
            actual: payload.len(),
        });
    }
    match payload[0] {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(DptError::InvalidData(other as u16)),
    }
}
