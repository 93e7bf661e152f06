//! Application layer: request correlation, retry, heartbeat, and the
//! per-address status cache. No sockets here — infrastructure is reached
//! through the [`retry::BodySender`] seam.

pub mod event_pool;
pub mod heartbeat;
pub mod retry;
pub mod status_pool;

/// Internal events the supervisor reacts to by closing the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The heartbeat went unanswered past the connection timeout.
    LivenessLost,
    /// The gateway asked to tear down our channel.
    DisconnectRequested { channel_id: u8 },
}
