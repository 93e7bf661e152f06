//! Domain entities shared by the client and the codec.
//!
//! Pure data types with no I/O and no protocol framing: KNX bus addresses
//! and their parsing/formatting rules live here.

pub mod address;
