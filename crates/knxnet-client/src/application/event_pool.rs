//! Request/response correlation pool.
//!
//! Each protocol phase that awaits an answer owns one [`EventCell`]: a slot
//! holding the most recent request, its buffered response(s), and the
//! timestamps the heartbeat reads. The set of cells is fixed for the
//! client's lifetime — correlation keys are protocol phases, not open-ended
//! identifiers — so the pool is a plain struct of cells, each with its own
//! lock.
//!
//! Wakeups are notification-driven: delivery calls `notify_waiters`, and
//! waiters re-check at most every `check_interval` so a missed notification
//! costs one interval, never the whole timeout.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use knxnet_core::protocol::body::{Body, ServiceType};
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

/// Buffered responses of one cell.
#[derive(Debug)]
enum ResponseSlot {
    /// At most one pending response; a new delivery replaces the old.
    Single(Option<Body>),
    /// All responses since the last request, in arrival order.
    Multi(Vec<Body>),
}

#[derive(Debug)]
struct CellState {
    request: Option<Body>,
    responses: ResponseSlot,
    last_request_at: Option<Instant>,
    last_response_at: Option<Instant>,
}

/// One correlation slot: request in, response(s) out, timestamps alongside.
#[derive(Debug)]
pub struct EventCell {
    state: Mutex<CellState>,
    notify: Notify,
}

impl EventCell {
    /// Cell for request/response pairs with exactly one pending answer.
    pub fn single() -> Self {
        Self::new(ResponseSlot::Single(None))
    }

    /// Cell buffering many concurrent answers (search responses, tunnel
    /// acks from interleaved senders).
    pub fn multi() -> Self {
        Self::new(ResponseSlot::Multi(Vec::new()))
    }

    fn new(responses: ResponseSlot) -> Self {
        Self {
            state: Mutex::new(CellState {
                request: None,
                responses,
                last_request_at: None,
                last_response_at: None,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        // A poisoned cell still holds consistent data: every mutation is a
        // single whole-value assignment.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a new request and invalidates buffered responses from any
    /// earlier request.
    pub fn begin_request(&self, request: Body) {
        let mut state = self.lock();
        state.request = Some(request);
        state.last_request_at = Some(Instant::now());
        match &mut state.responses {
            ResponseSlot::Single(slot) => *slot = None,
            ResponseSlot::Multi(buf) => buf.clear(),
        }
    }

    /// Refreshes the request timestamp without clearing responses. Used
    /// when the identical request is re-sent.
    pub fn touch_request(&self) {
        self.lock().last_request_at = Some(Instant::now());
    }

    /// Buffers an inbound response and wakes waiters.
    pub fn deliver(&self, response: Body) {
        {
            let mut state = self.lock();
            state.last_response_at = Some(Instant::now());
            match &mut state.responses {
                ResponseSlot::Single(slot) => *slot = Some(response),
                ResponseSlot::Multi(buf) => buf.push(response),
            }
        }
        self.notify.notify_waiters();
    }

    /// Removes and returns the first buffered response the predicate
    /// accepts, scanning the whole buffer for multi cells.
    pub fn take_matching(&self, predicate: impl Fn(&Body) -> bool) -> Option<Body> {
        let mut state = self.lock();
        match &mut state.responses {
            ResponseSlot::Single(slot) => {
                if slot.as_ref().is_some_and(&predicate) {
                    slot.take()
                } else {
                    None
                }
            }
            ResponseSlot::Multi(buf) => {
                let idx = buf.iter().position(&predicate)?;
                Some(buf.remove(idx))
            }
        }
    }

    /// Drains every buffered response (discovery collects all of them).
    pub fn take_all(&self) -> Vec<Body> {
        let mut state = self.lock();
        match &mut state.responses {
            ResponseSlot::Single(slot) => slot.take().into_iter().collect(),
            ResponseSlot::Multi(buf) => std::mem::take(buf),
        }
    }

    /// Waits until a response matching `predicate` is buffered or `timeout`
    /// elapses. Re-checks at least every `check_interval`.
    pub async fn wait_matching(
        &self,
        predicate: impl Fn(&Body) -> bool,
        wait_budget: Duration,
        check_interval: Duration,
    ) -> Option<Body> {
        let deadline = Instant::now() + wait_budget;
        loop {
            if let Some(response) = self.take_matching(&predicate) {
                return Some(response);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(check_interval);
            let _ = timeout(wait, self.notify.notified()).await;
        }
    }

    /// `(last_request_at, last_response_at)` for the heartbeat.
    pub fn timestamps(&self) -> (Option<Instant>, Option<Instant>) {
        let state = self.lock();
        (state.last_request_at, state.last_response_at)
    }
}

/// The fixed set of correlation cells, one per awaiting protocol phase.
///
/// Cells are shared: the frame handler delivers into the same cell the
/// heartbeat task and the request path wait on.
#[derive(Debug)]
pub struct EventPool {
    pub connect: Arc<EventCell>,
    pub connection_state: Arc<EventCell>,
    pub disconnect: Arc<EventCell>,
    pub description: Arc<EventCell>,
    pub search: Arc<EventCell>,
    pub tunnel_ack: Arc<EventCell>,
}

impl EventPool {
    pub fn new() -> Self {
        Self {
            connect: Arc::new(EventCell::single()),
            connection_state: Arc::new(EventCell::single()),
            disconnect: Arc::new(EventCell::single()),
            description: Arc::new(EventCell::single()),
            search: Arc::new(EventCell::multi()),
            tunnel_ack: Arc::new(EventCell::multi()),
        }
    }

    /// Maps an inbound response body to the cell awaiting it.
    pub fn cell_for(&self, body: &Body) -> Option<&EventCell> {
        match body.service_type() {
            ServiceType::ConnectResponse => Some(&self.connect),
            ServiceType::ConnectionStateResponse => Some(&self.connection_state),
            ServiceType::DisconnectResponse => Some(&self.disconnect),
            ServiceType::DescriptionResponse => Some(&self.description),
            ServiceType::SearchResponse => Some(&self.search),
            ServiceType::TunnelingAck => Some(&self.tunnel_ack),
            _ => None,
        }
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
