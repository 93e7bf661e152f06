//! DPT 9.xxx: 2-byte float (temperature, lux, humidity, ...).
//!
//! Wire layout, big-endian:
//!
//! ```text
//! S EEEE MMMMMMMMMMM
//! ```
//!
//! `value = M × 2^E × 0.01`, where M is the 11-bit mantissa extended by the
//! sign bit S to a two's-complement value in -2048..=2047 and E is a 4-bit
//! exponent. Resolution degrades as magnitude grows; `0x7FFF` is the
//! reserved "invalid data" pattern.

use crate::dpt::DptError;

/// Reserved pattern meaning "no valid measurement".
const INVALID_PATTERN: u16 = 0x7FFF;

/// Encodes a float as a 2-byte DPT 9 payload.
///
/// The nearest representable value is used; resolution is 0.01 near zero
/// and halves with every exponent step.
pub fn encode(value: f32) -> Result<Vec<u8>, DptError> {
    let mut mantissa = (value as f64) * 100.0;
    let mut exponent: u16 = 0;
    while !(-2048.0..=2047.0).contains(&mantissa) {
        mantissa /= 2.0;
        exponent += 1;
        if exponent > 15 {
            return Err(DptError::OutOfRange {
                dpt: "DPT 9",
                value: value as f64,
            });
        }
    }
    let m = mantissa.round() as i16;
    let sign = if m < 0 { 0x8000 } else { 0x0000 };
    let raw = sign | (exponent << 11) | (m as u16 & 0x07FF);
    if raw == INVALID_PATTERN {
        return Err(DptError::OutOfRange {
            dpt: "DPT 9",
            value: value as f64,
        });
    }
    Ok(raw.to_be_bytes().to_vec())
}

/// Decodes a 2-byte DPT 9 payload.
pub fn decode(payload: &[u8]) -> Result<f32, DptError> {
    if payload.len() != 2 {
        return Err(DptError::WrongLength {
            expected: 2,
            actual: payload.len(),
        });
    }
    let raw = u16::from_be_bytes([payload[0], payload[1]]);
    if raw == INVALID_PATTERN {
        return Err(DptError::InvalidData(raw));
    }
    let exponent = (raw >> 11) & 0x0F;
    let mut mantissa = (raw & 0x07FF) as i32;
    if raw & 0x8000 != 0 {
        mantissa -= 2048;
    }
    Ok((mantissa << exponent) as f32 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_temperature_canonical_bytes() {
        // 21.00 °C: mantissa 1050, exponent 1.
        assert_eq!(encode(21.0).unwrap(), vec![0x0C, 0x1A]);
        assert_eq!(decode(&[0x0C, 0x1A]).unwrap(), 21.0);
    }

    #[test]
    fn test_negative_value_uses_twos_complement() {
        // -30.00: mantissa -1500, exponent 1.
        assert_eq!(encode(-30.0).unwrap(), vec![0x8A, 0x24]);
        assert_eq!(decode(&[0x8A, 0x24]).unwrap(), -30.0);
    }

    #[test]
    fn test_zero_is_all_zero_bits() {
        assert_eq!(encode(0.0).unwrap(), vec![0x00, 0x00]);
        assert_eq!(decode(&[0x00, 0x00]).unwrap(), 0.0);
    }

    #[test]
    fn test_small_values_keep_centiunit_resolution() {
        assert_eq!(decode(&encode(0.01).unwrap()).unwrap(), 0.01);
        assert_eq!(decode(&encode(-0.01).unwrap()).unwrap(), -0.01);
        assert_eq!(decode(&encode(20.47).unwrap()).unwrap(), 20.47);
    }

    #[test]
    fn test_large_values_roundtrip_within_resolution() {
        let value = 670433.28; // mantissa 2046, exponent 15
        assert_eq!(decode(&encode(value).unwrap()).unwrap(), value);

        let lo = -671088.64; // mantissa -2048, exponent 15
        assert_eq!(decode(&encode(lo).unwrap()).unwrap(), lo);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(
            encode(700000.0),
            Err(DptError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(-700000.0),
            Err(DptError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_rejected_both_ways() {
        // 0x7FFF would be mantissa 2047, exponent 15.
        assert!(matches!(encode(670760.96), Err(DptError::OutOfRange { .. })));
        assert_eq!(decode(&[0x7F, 0xFF]), Err(DptError::InvalidData(0x7FFF)));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(
            decode(&[0x00]),
            Err(DptError::WrongLength { expected: 2, actual: 1 })
        );
    }
}
