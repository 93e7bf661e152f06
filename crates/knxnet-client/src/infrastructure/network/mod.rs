//! Network infrastructure: one UDP channel per logical role and the
//! communicator that pumps frames through it.

pub mod channel;
pub mod communicator;
pub mod discovery;

pub use channel::UdpChannel;
pub use communicator::{ChannelCommunicator, FrameHandler};
