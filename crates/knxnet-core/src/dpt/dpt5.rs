//! DPT 5.xxx: 8-bit unsigned value.
//!
//! The raw byte is the value for counts (5.010); DPT 5.001 additionally
//! scales 0–100 % onto the full 0–255 byte range.

use crate::dpt::DptError;

/// Encodes a raw 8-bit value (DPT 5.010 and friends).
pub fn encode(value: u8) -> Vec<u8> {
    vec![value]
}

/// Decodes a raw 8-bit value.
pub fn decode(payload: &[u8]) -> Result<u8, DptError> {
    if payload.len() != 1 {
        return Err(DptError::WrongLength {
            expected: 1,
            actual: payload.len(),
        });
    }
    Ok(payload[0])
}

/// Encodes a percentage (DPT 5.001) by scaling 0–100 onto 0–255.
pub fn encode_percent(percent: f32) -> Result<Vec<u8>, DptError> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(DptError::OutOfRange {
            dpt: "DPT 5.001",
            value: percent as f64,
        });
    }
    Ok(vec![(percent * 255.0 / 100.0).round() as u8])
}

/// Decodes a DPT 5.001 percentage.
pub fn decode_percent(payload: &[u8]) -> Result<f32, DptError> {
    Ok(decode(payload)? as f32 * 100.0 / 255.0)
}
