//! Datapoint type (DPT) conversions.
//!
//! A group payload is just bytes; the DPT agreed for the group address
//! gives them meaning. This module covers the three families the client
//! exposes typed helpers for:
//!
//! - [`dpt1`] – 1-bit switch/boolean (DPT 1.xxx), carried inline in the
//!   APCI byte.
//! - [`dpt5`] – 8-bit unsigned (DPT 5.xxx), including the 0–100 % scaling
//!   of DPT 5.001.
//! - [`dpt9`] – 2-byte float (DPT 9.xxx): sign, 4-bit exponent, 11-bit
//!   two's-complement mantissa, resolution 0.01.
//!
//! Anything else goes through the raw payload APIs unchanged.

use thiserror::Error;

pub mod dpt1;
pub mod dpt5;
pub mod dpt9;

/// Errors converting between group payload bytes and typed values.
#[derive(Debug, Error, PartialEq)]
pub enum DptError {
    #[error("payload is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("value {value} is outside the range of {dpt}")]
    OutOfRange { dpt: &'static str, value: f64 },

    #[error("payload 0x{0:04X} is not a valid encoding")]
    InvalidData(u16),
}
