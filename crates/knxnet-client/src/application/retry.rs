//! Send/retry engine: enqueue a request, await its correlated response,
//! re-send on timeout, bounded by a total attempt count.
//!
//! Retries re-send the identical body — same fields, same tunneling
//! sequence number — so the peer sees duplicates, not new requests.
//! Exhausting the budget is a normal `Ok(None)` outcome; only an observed
//! shutdown turns into an error.

use std::time::Duration;

use async_trait::async_trait;
use knxnet_core::protocol::body::Body;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::application::event_pool::EventCell;
use crate::error::ClientError;

/// Seam between the retry engine and whatever puts bodies on the wire.
#[async_trait]
pub trait BodySender: Send + Sync {
    async fn send_body(&self, body: Body) -> Result<(), ClientError>;
}

/// Attempt and timing budget for one `send_and_wait` call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum sends, first attempt included.
    pub total_attempts: u32,
    /// Per-attempt wait for a matching response.
    pub timeout: Duration,
    /// Upper bound on one notification wait inside the attempt.
    pub check_interval: Duration,
}

/// Sends `request` and waits for a response matching `predicate`.
///
/// The request is recorded in `cell` first (clearing stale responses),
/// then sent up to `policy.total_attempts` times. The first matching
/// response wins immediately. Worst case the call takes about
/// `total_attempts × timeout` and returns `Ok(None)`.
pub async fn send_and_wait(
    sender: &dyn BodySender,
    cell: &EventCell,
    request: Body,
    predicate: impl Fn(&Body) -> bool + Send + Sync,
    policy: &RetryPolicy,
    shutdown: &watch::Receiver<bool>,
) -> Result<Option<Body>, ClientError> {
    cell.begin_request(request.clone());

    for attempt in 1..=policy.total_attempts {
        if *shutdown.borrow() {
            return Err(ClientError::Closed);
        }
        if attempt > 1 {
            debug!(attempt, "re-sending request after timeout");
            cell.touch_request();
        }
        sender.send_body(request.clone()).await?;

        let mut shutdown = shutdown.clone();
        tokio::select! {
            matched = cell.wait_matching(&predicate, policy.timeout, policy.check_interval) => {
                if let Some(response) = matched {
                    return Ok(Some(response));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Err(ClientError::Closed);
                }
            }
        }
    }

    warn!(
        attempts = policy.total_attempts,
        "request went unanswered, giving up"
    );
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
