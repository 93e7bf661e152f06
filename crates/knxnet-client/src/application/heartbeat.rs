//! Connection-state heartbeat.
//!
//! Keeps a tunneling connection alive and detects silent failure. The loop
//! reads its notion of time from the connection-state cell's timestamps
//! (shared with the retry path, so an application-triggered
//! connection-state exchange also counts). The connect cell's response
//! anchors only the fatal timeout until the first heartbeat answer
//! arrives; it never settles a pending request.
//!
//! State machine: send a request immediately on start, then
//!
//! - awaiting an answer: liveness is lost once the last answer of any kind
//!   is older than `connection_timeout` (fatal, reported exactly once);
//!   otherwise the pending request is re-sent every `request_timeout`.
//! - idle (answered): the next request goes out `interval` after the last
//!   one.
//!
//! All sleeps race the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use knxnet_core::protocol::body::Body;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::application::event_pool::EventCell;
use crate::application::retry::BodySender;
use crate::application::ClientEvent;
use crate::config::HeartbeatConfig;

/// Runs the heartbeat until shutdown or liveness loss.
///
/// `request` is the fixed connection-state request for the established
/// channel; `bootstrap` is the connect cell whose response timestamp marks
/// when the gateway was last heard from, before any heartbeat answer.
pub async fn run(
    sender: Arc<dyn BodySender>,
    cell: Arc<EventCell>,
    bootstrap: Arc<EventCell>,
    request: Body,
    config: HeartbeatConfig,
    events: mpsc::Sender<ClientEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let started_at = Instant::now();

    cell.begin_request(request.clone());
    if sender.send_body(request.clone()).await.is_err() {
        return;
    }
    debug!("heartbeat started");

    loop {
        let (last_request, last_response) = cell.timestamps();
        let (_, bootstrap_response) = bootstrap.timestamps();
        // begin_request above guarantees a request timestamp exists.
        let last_request = last_request.unwrap_or(started_at);

        let now = Instant::now();
        // A request stays pending until the heartbeat cell itself answers;
        // the connect response only anchors the fatal timeout below.
        let awaiting = last_response.map_or(true, |r| r < last_request);

        let next_wake = if awaiting {
            let response_anchor = match (last_response, bootstrap_response) {
                (Some(a), Some(b)) => a.max(b),
                (a, b) => a.or(b).unwrap_or(started_at),
            };
            if now - response_anchor > config.connection_timeout() {
                warn!(
                    silent_for = ?(now - response_anchor),
                    "heartbeat went unanswered, declaring the connection dead"
                );
                let _ = events.send(ClientEvent::LivenessLost).await;
                return;
            }
            if now - last_request > config.request_timeout() {
                trace!("re-sending pending connection-state request");
                cell.touch_request();
                if sender.send_body(request.clone()).await.is_err() {
                    return;
                }
            }
            config.poll_interval()
        } else {
            let next_request_at = last_request + config.interval();
            if now >= next_request_at {
                trace!("sending scheduled connection-state request");
                cell.begin_request(request.clone());
                if sender.send_body(request.clone()).await.is_err() {
                    return;
                }
                config.poll_interval()
            } else {
                (next_request_at - now).min(config.interval())
            }
        };

        tokio::select! {
            _ = sleep(next_wake) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("heartbeat stopping on shutdown");
                    return;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knxnet_core::protocol::body::{
        ConnectResponseBody, ConnectionStateRequestBody, ConnectionStateResponseBody, ErrorCode,
        Hpai,
    };
    use tokio::sync::Mutex;

    use crate::error::ClientError;

    /// Counts sends; answers into the cell when `responsive` is set.
    struct FakeGateway {
        cell: Arc<EventCell>,
        responsive: bool,
        sends: Mutex<u32>,
    }

    #[async_trait]
    impl BodySender for FakeGateway {
        async fn send_body(&self, _body: Body) -> Result<(), ClientError> {
            *self.sends.lock().await += 1;
            if self.responsive {
                self.cell.deliver(Body::ConnectionStateResponse(
                    ConnectionStateResponseBody {
                        channel_id: 5,
                        status: ErrorCode::NoError,
                    },
                ));
            }
            Ok(())
        }
    }

    fn request() -> Body {
        Body::ConnectionStateRequest(ConnectionStateRequestBody {
            channel_id: 5,
            control_endpoint: Hpai::unbound(),
        })
    }

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_secs: 10,
            request_timeout_secs: 2,
            connection_timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }

    fn bootstrap_with_connect_response() -> Arc<EventCell> {
        let cell = Arc::new(EventCell::single());
        cell.deliver(Body::ConnectResponse(ConnectResponseBody {
            channel_id: 5,
            status: ErrorCode::NoError,
            data_endpoint: None,
            crd: None,
        }));
        cell
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_gateway_keeps_connection_alive() {
        // Arrange
        let cell = Arc::new(EventCell::single());
        let gateway = Arc::new(FakeGateway {
            cell: Arc::clone(&cell),
            responsive: true,
            sends: Mutex::new(0),
        });
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&gateway) as Arc<dyn BodySender>,
            Arc::clone(&cell),
            bootstrap_with_connect_response(),
            request(),
            fast_config(),
            event_tx,
            shutdown_rx,
        ));

        // Act – run for several intervals
        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Assert – periodic requests went out, no liveness event fired
        assert!(*gateway.sends.lock().await >= 3);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_gateway_triggers_liveness_lost_once() {
        // Arrange – gateway never answers; only the connect response exists
        let cell = Arc::new(EventCell::single());
        let gateway = Arc::new(FakeGateway {
            cell: Arc::clone(&cell),
            responsive: false,
            sends: Mutex::new(0),
        });
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&gateway) as Arc<dyn BodySender>,
            Arc::clone(&cell),
            bootstrap_with_connect_response(),
            request(),
            fast_config(),
            event_tx,
            shutdown_rx,
        ));

        // Act – let the connection timeout elapse
        tokio::time::sleep(Duration::from_secs(40)).await;
        handle.await.unwrap();

        // Assert – exactly one event, then the task ended
        assert_eq!(event_rx.recv().await, Some(ClientEvent::LivenessLost));
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_is_resent_before_giving_up() {
        // Arrange
        let cell = Arc::new(EventCell::single());
        let gateway = Arc::new(FakeGateway {
            cell: Arc::clone(&cell),
            responsive: false,
            sends: Mutex::new(0),
        });
        let (event_tx, _event_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&gateway) as Arc<dyn BodySender>,
            Arc::clone(&cell),
            bootstrap_with_connect_response(),
            request(),
            fast_config(),
            event_tx,
            shutdown_rx,
        ));

        // Act – stay inside the connection timeout but past several
        // request timeouts
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Assert – initial send plus at least one re-send
        assert!(*gateway.sends.lock().await >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_heartbeat_promptly() {
        // Arrange
        let cell = Arc::new(EventCell::single());
        let gateway = Arc::new(FakeGateway {
            cell: Arc::clone(&cell),
            responsive: true,
            sends: Mutex::new(0),
        });
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&gateway) as Arc<dyn BodySender>,
            Arc::clone(&cell),
            bootstrap_with_connect_response(),
            request(),
            fast_config(),
            event_tx,
            shutdown_rx,
        ));

        // Act
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Assert – no liveness event on a clean stop
        assert!(event_rx.try_recv().is_err());
    }
}
