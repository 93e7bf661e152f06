//! KNX bus addressing: individual addresses and group addresses.
//!
//! Every CEMI frame names a source (always an *individual* address — one
//! physical device on the bus) and a destination (individual for
//! point-to-point traffic, group for the shared group objects that lights,
//! sensors, and actuators subscribe to). Both are 16-bit values with
//! bit-packed sub-fields:
//!
//! ```text
//! Individual  area.line.device   aaaa llll dddddddd   e.g. 1.1.23
//! Group       main/middle/sub    mmmmm mmm ssssssss   e.g. 1/2/3
//! ```
//!
//! Which of the two a destination field means is *not* stored in the
//! address bytes themselves — it is selected by the address-type bit in the
//! second CEMI control byte. [`KnxAddress`] carries that distinction in the
//! type system so the codec can validate the bit against the value.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum value of the group address "main" field (5 bits).
pub const MAX_GROUP_MAIN: u8 = 31;
/// Maximum value of the group address "middle" field (3 bits).
pub const MAX_GROUP_MIDDLE: u8 = 7;
/// Maximum value of the individual address "area" field (4 bits).
pub const MAX_AREA: u8 = 15;
/// Maximum value of the individual address "line" field (4 bits).
pub const MAX_LINE: u8 = 15;

/// Error type for address construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("{field} {value} exceeds maximum {max}")]
    ComponentOutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },
    #[error("malformed address string {0:?}")]
    Parse(String),
}

// ── Individual addresses ──────────────────────────────────────────────────────

/// A physical device address in `area.line.device` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndividualAddress(u16);

impl IndividualAddress {
    /// Builds an address from its three components, validating field widths.
    pub fn new(area: u8, line: u8, device: u8) -> Result<Self, AddressError> {
        if area > MAX_AREA {
            return Err(AddressError::ComponentOutOfRange {
                field: "area",
                value: area as u16,
                max: MAX_AREA as u16,
            });
        }
        if line > MAX_LINE {
            return Err(AddressError::ComponentOutOfRange {
                field: "line",
                value: line as u16,
                max: MAX_LINE as u16,
            });
        }
        Ok(Self(
            ((area as u16) << 12) | ((line as u16) << 8) | device as u16,
        ))
    }

    /// Reinterprets a raw 16-bit value; every bit pattern is a valid address.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// The unassigned address `0.0.0`, used as the source of client frames
    /// until the gateway substitutes its own.
    pub const fn unassigned() -> Self {
        Self(0)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn area(self) -> u8 {
        (self.0 >> 12) as u8
    }

    pub const fn line(self) -> u8 {
        ((self.0 >> 8) & 0x0F) as u8
    }

    pub const fn device(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl FromStr for IndividualAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (a, l, d) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(l), Some(d), None) => (a, l, d),
            _ => return Err(AddressError::Parse(s.to_string())),
        };
        let parse = |p: &str| p.parse::<u8>().map_err(|_| AddressError::Parse(s.to_string()));
        Self::new(parse(a)?, parse(l)?, parse(d)?)
    }
}

// ── Group addresses ───────────────────────────────────────────────────────────

/// A logical group object address in three-level `main/middle/sub` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress(u16);

impl GroupAddress {
    /// Builds an address from its three components, validating field widths.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self, AddressError> {
        if main > MAX_GROUP_MAIN {
            return Err(AddressError::ComponentOutOfRange {
                field: "main",
                value: main as u16,
                max: MAX_GROUP_MAIN as u16,
            });
        }
        if middle > MAX_GROUP_MIDDLE {
            return Err(AddressError::ComponentOutOfRange {
                field: "middle",
                value: middle as u16,
                max: MAX_GROUP_MIDDLE as u16,
            });
        }
        Ok(Self(
            ((main as u16) << 11) | ((middle as u16) << 8) | sub as u16,
        ))
    }

    /// Reinterprets a raw 16-bit value; every bit pattern is a valid address.
    /// `0/0/0` is the bus broadcast address.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn main(self) -> u8 {
        (self.0 >> 11) as u8
    }

    pub const fn middle(self) -> u8 {
        ((self.0 >> 8) & 0x07) as u8
    }

    pub const fn sub(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl FromStr for GroupAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (m, i, u) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(i), Some(u), None) => (m, i, u),
            _ => return Err(AddressError::Parse(s.to_string())),
        };
        let parse = |p: &str| p.parse::<u8>().map_err(|_| AddressError::Parse(s.to_string()));
        Self::new(parse(m)?, parse(i)?, parse(u)?)
    }
}

// ── Destination union ─────────────────────────────────────────────────────────

/// A CEMI destination: either kind of bus address.
///
/// The discriminant mirrors the address-type bit of control byte 2; the
/// codec rejects frames where the bit and the variant disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnxAddress {
    Individual(IndividualAddress),
    Group(GroupAddress),
}

impl KnxAddress {
    pub const fn raw(self) -> u16 {
        match self {
            KnxAddress::Individual(a) => a.raw(),
            KnxAddress::Group(a) => a.raw(),
        }
    }

    pub const fn is_group(self) -> bool {
        matches!(self, KnxAddress::Group(_))
    }
}

impl From<IndividualAddress> for KnxAddress {
    fn from(a: IndividualAddress) -> Self {
        KnxAddress::Individual(a)
    }
}

impl From<GroupAddress> for KnxAddress {
    fn from(a: GroupAddress) -> Self {
        KnxAddress::Group(a)
    }
}

impl fmt::Display for KnxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxAddress::Individual(a) => a.fmt(f),
            KnxAddress::Group(a) => a.fmt(f),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
