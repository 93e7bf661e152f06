//! Infrastructure layer: sockets and the communicators built on them.

pub mod network;
