//! The client facade: connection lifecycle, group-value traffic, and the
//! frame handler that fans inbound bodies out to the correlation cells,
//! the status pool, and the supervisor.
//!
//! Tunneling uses one UDP socket for control and data traffic. In NAT mode
//! (the default) every advertised endpoint is the wildcard HPAI, telling
//! the gateway to answer to the datagram source; otherwise the concrete
//! local address is advertised.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use knxnet_core::domain::address::{GroupAddress, IndividualAddress, KnxAddress};
use knxnet_core::protocol::body::{
    affinity, Body, ConnectRequestBody, ConnectionRequestInfo, ConnectionStateRequestBody,
    DisconnectRequestBody, DisconnectResponseBody, ErrorCode, Hpai, RoutingIndicationBody,
    TunnelingAckBody, TunnelingRequestBody,
};
use knxnet_core::protocol::cemi::{Apci, CemiFrame, MessageCode};
use knxnet_core::protocol::codec::ProtocolError;
use knxnet_core::protocol::sequence::SequenceCounter;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::application::event_pool::EventPool;
use crate::application::heartbeat;
use crate::application::retry::RetryPolicy;
use crate::application::status_pool::{StatusPool, StatusSnapshot};
use crate::application::ClientEvent;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::infrastructure::network::channel::UdpChannel;
use crate::infrastructure::network::communicator::{ChannelCommunicator, FrameHandler};

/// Buffer depth for supervisor events; lifecycle events are rare.
const EVENT_QUEUE_DEPTH: usize = 8;

// ── Transport ─────────────────────────────────────────────────────────────────

enum Transport {
    Tunnel {
        communicator: Arc<ChannelCommunicator>,
        channel_id: u8,
        /// Individual address the gateway assigned to this tunnel endpoint;
        /// stamped as the source of outgoing group frames.
        assigned: IndividualAddress,
    },
    Routing {
        communicator: Arc<ChannelCommunicator>,
    },
}

impl Transport {
    fn communicator(&self) -> &Arc<ChannelCommunicator> {
        match self {
            Transport::Tunnel { communicator, .. } => communicator,
            Transport::Routing { communicator } => communicator,
        }
    }
}

// ── Frame handler ─────────────────────────────────────────────────────────────

/// Routes every inbound body: correlation responses into their cells,
/// data frames into acks and the status pool, lifecycle requests to the
/// supervisor.
struct ClientFrameHandler {
    events: Arc<EventPool>,
    status: Arc<StatusPool>,
    outbound: Arc<ChannelCommunicator>,
    supervisor: mpsc::Sender<ClientEvent>,
    /// Channel id of the live tunnel; 0 until the handshake assigns one.
    channel_id: Arc<AtomicU8>,
}

#[async_trait]
impl FrameHandler for ClientFrameHandler {
    async fn on_frame(&self, body: Body) {
        // Capture the assigned channel id before the response is handed to
        // the handshake waiter; a gateway may send DISCONNECT_REQUEST
        // before the waiter has stored it.
        if let Body::ConnectResponse(response) = &body {
            if response.status.is_ok() {
                self.channel_id.store(response.channel_id, Ordering::Relaxed);
            }
        }

        if let Some(cell) = self.events.cell_for(&body) {
            cell.deliver(body);
            return;
        }

        match body {
            Body::TunnelingRequest(request) => {
                // Ack first, mirroring channel and sequence, so the gateway
                // never re-sends while we process the payload.
                let ack = Body::TunnelingAck(TunnelingAckBody {
                    channel_id: request.channel_id,
                    sequence: request.sequence,
                    status: ErrorCode::NoError,
                });
                if let Err(e) = self.outbound.send(ack).await {
                    debug!("could not ack tunneling request: {e}");
                }
                self.absorb_cemi(&request.cemi);
            }
            Body::RoutingIndication(indication) => self.absorb_cemi(&indication.cemi),
            Body::DisconnectRequest(request) => {
                let ours = self.channel_id.load(Ordering::Relaxed);
                if request.channel_id != ours {
                    debug!(
                        requested = request.channel_id,
                        ours, "disconnect request for a different channel"
                    );
                    return;
                }
                info!(channel_id = ours, "gateway requested disconnect");
                let response = Body::DisconnectResponse(DisconnectResponseBody {
                    channel_id: request.channel_id,
                    status: ErrorCode::NoError,
                });
                if let Err(e) = self.outbound.send(response).await {
                    debug!("could not answer disconnect request: {e}");
                }
                let _ = self
                    .supervisor
                    .send(ClientEvent::DisconnectRequested {
                        channel_id: request.channel_id,
                    })
                    .await;
            }
            Body::RoutingBusy(busy) => {
                warn!(wait_ms = busy.wait_time_ms, "router asked senders to back off");
            }
            Body::RoutingLostMessage(lost) => {
                warn!(lost = lost.lost_messages, "router reported dropped frames");
            }
            other => trace!(service = ?other.service_type(), "unhandled inbound frame"),
        }
    }
}

impl ClientFrameHandler {
    /// Folds a bus indication into the status pool. Only group writes and
    /// responses carry state; confirmations and reads do not.
    fn absorb_cemi(&self, cemi: &CemiFrame) {
        if cemi.message_code != MessageCode::LDataInd {
            trace!(code = ?cemi.message_code, "ignoring non-indication frame");
            return;
        }
        match cemi.apci {
            Apci::GroupValueWrite | Apci::GroupValueResponse => {
                self.status.update(
                    cemi.destination,
                    StatusSnapshot {
                        source: cemi.source,
                        apci: cemi.apci,
                        data: cemi.data.clone(),
                        created_at: Instant::now(),
                    },
                );
            }
            _ => {}
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// A connected KNX Net/IP client, tunneling through one gateway or
/// multicasting on the routing group.
pub struct KnxClient {
    transport: Transport,
    events: Arc<EventPool>,
    status: Arc<StatusPool>,
    sequence: SequenceCounter,
    config: ClientConfig,
    /// Endpoint advertised in control bodies after the handshake.
    control_endpoint: Hpai,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl KnxClient {
    /// Opens a tunnel to the configured gateway: handshake, heartbeat,
    /// supervisor. The returned client is ready for group traffic.
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let gateway = config.connection.gateway_addr()?;
        let channel = UdpChannel::tunnel(gateway).await?;
        let control_endpoint = if config.connection.nat_mode {
            Hpai::unbound()
        } else {
            match channel.local_addr()? {
                SocketAddr::V4(addr) => Hpai::udp(addr),
                // The socket is bound to an IPv4 wildcard; fall back to the
                // NAT convention rather than advertise an IPv6 endpoint.
                SocketAddr::V6(_) => Hpai::unbound(),
            }
        };
        let communicator =
            ChannelCommunicator::start(channel, affinity::CONTROL | affinity::DATA, &config.pool);

        let events = Arc::new(EventPool::new());
        let status = Arc::new(StatusPool::new());
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        communicator.subscribe(Arc::new(ClientFrameHandler {
            events: Arc::clone(&events),
            status: Arc::clone(&status),
            outbound: Arc::clone(&communicator),
            supervisor: event_tx.clone(),
            channel_id: Arc::new(AtomicU8::new(0)),
        }));

        // Handshake.
        let request = Body::ConnectRequest(ConnectRequestBody {
            control_endpoint,
            data_endpoint: control_endpoint,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
        });
        let policy = RetryPolicy {
            total_attempts: config.retry.total_attempts,
            timeout: config.timeouts.connect(),
            check_interval: config.retry.check_interval(),
        };
        let response = communicator
            .send_and_wait(request, &events.connect, |_| true, &policy)
            .await?;
        let response = match response {
            Some(Body::ConnectResponse(body)) => body,
            _ => {
                communicator.close();
                return Err(ClientError::NoResponse);
            }
        };
        if !response.status.is_ok() {
            communicator.close();
            return Err(ClientError::Rejected {
                code: response.status,
            });
        }
        let assigned = response
            .crd
            .map(|crd| crd.assigned_address)
            .unwrap_or_else(IndividualAddress::unassigned);
        info!(
            channel_id = response.channel_id,
            assigned = %assigned,
            %gateway,
            "tunnel established"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = Arc::new(Self {
            transport: Transport::Tunnel {
                communicator: Arc::clone(&communicator),
                channel_id: response.channel_id,
                assigned,
            },
            events: Arc::clone(&events),
            status,
            sequence: SequenceCounter::new(),
            control_endpoint,
            config: config.clone(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        });

        let heartbeat_request = Body::ConnectionStateRequest(ConnectionStateRequestBody {
            channel_id: response.channel_id,
            control_endpoint,
        });
        tokio::spawn(heartbeat::run(
            communicator,
            Arc::clone(&events.connection_state),
            Arc::clone(&events.connect),
            heartbeat_request,
            config.heartbeat.clone(),
            event_tx,
            shutdown_rx,
        ));
        Self::spawn_supervisor(Arc::clone(&client), event_rx);

        Ok(client)
    }

    /// Joins the routing multicast group. No handshake and no heartbeat:
    /// routing mode has no connection to keep alive.
    pub async fn routing(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let group = config.connection.multicast_addr()?;
        let channel = UdpChannel::routing(group).await?;
        let communicator = ChannelCommunicator::start(channel, affinity::MULTICAST, &config.pool);

        let events = Arc::new(EventPool::new());
        let status = Arc::new(StatusPool::new());
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        communicator.subscribe(Arc::new(ClientFrameHandler {
            events: Arc::clone(&events),
            status: Arc::clone(&status),
            outbound: Arc::clone(&communicator),
            supervisor: event_tx,
            channel_id: Arc::new(AtomicU8::new(0)),
        }));
        info!(%group, "joined routing multicast group");

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let client = Arc::new(Self {
            transport: Transport::Routing { communicator },
            events,
            status,
            sequence: SequenceCounter::new(),
            control_endpoint: Hpai::unbound(),
            config,
            shutdown_tx,
            closed: AtomicBool::new(false),
        });
        Self::spawn_supervisor(Arc::clone(&client), event_rx);
        Ok(client)
    }

    /// Consumes lifecycle events and drives the teardown they demand. The
    /// task holds its own reference, so the client outlives user drops
    /// until it has shut down cleanly.
    fn spawn_supervisor(client: Arc<Self>, mut events: mpsc::Receiver<ClientEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::LivenessLost => {
                        warn!("gateway stopped answering heartbeats, closing");
                        client.close_inner(true).await;
                    }
                    ClientEvent::DisconnectRequested { channel_id } => {
                        info!(channel_id, "closing after gateway-initiated disconnect");
                        // The handler already answered; no request of our own.
                        client.close_inner(false).await;
                    }
                }
            }
        });
    }

    /// Writes `data` to a group address. In tunneling mode the result says
    /// whether the gateway acknowledged the frame; routing mode is
    /// fire-and-forget and always reports `true` once sent.
    pub async fn group_write(
        &self,
        destination: GroupAddress,
        data: Vec<u8>,
    ) -> Result<bool, ClientError> {
        let cemi = CemiFrame::group_write(destination, data)?;
        self.send_group_frame(cemi).await
    }

    /// Asks the bus for the value of a group address and waits for the
    /// answering indication. `Ok(None)` means nobody answered in time.
    pub async fn group_read(
        &self,
        destination: GroupAddress,
    ) -> Result<Option<StatusSnapshot>, ClientError> {
        let address = KnxAddress::from(destination);
        // Whatever we hold for this address predates the read.
        self.status.set_dirty(address);
        let acked = self
            .send_group_frame(CemiFrame::group_read(destination))
            .await?;
        if !acked {
            return Ok(None);
        }
        Ok(self
            .status
            .get(
                address,
                true,
                self.config.timeouts.read(),
                self.config.retry.check_interval(),
            )
            .await)
    }

    /// Last observed value for a group address, possibly stale; never waits.
    pub fn read_status(&self, destination: GroupAddress) -> Option<StatusSnapshot> {
        self.status.peek(KnxAddress::from(destination))
    }

    /// The live status table.
    pub fn status(&self) -> &Arc<StatusPool> {
        &self.status
    }

    /// Registers a handler for every frame the data channel delivers.
    pub fn subscribe(&self, handler: Arc<dyn FrameHandler>) {
        self.transport.communicator().subscribe(handler);
    }

    /// Sends a raw body through the channel whose affinity accepts it.
    pub async fn send(&self, body: Body) -> Result<(), ClientError> {
        let communicator = self.transport.communicator();
        if !communicator.is_compatible(&body) {
            return Err(ClientError::Protocol(ProtocolError::UnsupportedFeature(
                format!("no open channel accepts {:?}", body.service_type()),
            )));
        }
        communicator.send(body).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Closes the client: best-effort disconnect exchange (tunneling only),
    /// then shutdown of the heartbeat and the communicator. Idempotent.
    pub async fn close(&self) {
        self.close_inner(true).await;
    }

    async fn close_inner(&self, send_disconnect: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Transport::Tunnel {
            communicator,
            channel_id,
            ..
        } = &self.transport
        {
            if send_disconnect {
                let request = Body::DisconnectRequest(DisconnectRequestBody {
                    channel_id: *channel_id,
                    control_endpoint: self.control_endpoint,
                });
                // One short attempt: a gateway that went away must not
                // stall teardown.
                let policy = RetryPolicy {
                    total_attempts: 1,
                    timeout: self.config.timeouts.data(),
                    check_interval: self.config.retry.check_interval(),
                };
                let id = *channel_id;
                match communicator
                    .send_and_wait(
                        request,
                        &self.events.disconnect,
                        move |body| {
                            matches!(body, Body::DisconnectResponse(r) if r.channel_id == id)
                        },
                        &policy,
                    )
                    .await
                {
                    Ok(Some(_)) => debug!("gateway acknowledged disconnect"),
                    Ok(None) => debug!("disconnect request went unanswered"),
                    Err(e) => debug!("disconnect exchange failed: {e}"),
                }
            }
        }
        let _ = self.shutdown_tx.send(true);
        self.transport.communicator().close();
        info!("client closed");
    }

    fn data_policy(&self) -> RetryPolicy {
        RetryPolicy {
            total_attempts: self.config.retry.total_attempts,
            timeout: self.config.timeouts.data(),
            check_interval: self.config.retry.check_interval(),
        }
    }

    async fn send_group_frame(&self, cemi: CemiFrame) -> Result<bool, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        match &self.transport {
            Transport::Tunnel {
                communicator,
                channel_id,
                assigned,
            } => {
                let mut cemi = cemi;
                cemi.source = *assigned;
                // The sequence is drawn once; retries of this request
                // re-send the identical number.
                let sequence = self.sequence.next();
                let request = Body::TunnelingRequest(TunnelingRequestBody {
                    channel_id: *channel_id,
                    sequence,
                    cemi,
                });
                let id = *channel_id;
                let acked = communicator
                    .send_and_wait(
                        request,
                        &self.events.tunnel_ack,
                        move |body| {
                            matches!(body, Body::TunnelingAck(a)
                                if a.channel_id == id && a.sequence == sequence)
                        },
                        &self.data_policy(),
                    )
                    .await?;
                Ok(acked.is_some())
            }
            Transport::Routing { communicator } => {
                let mut cemi = cemi;
                // On the multicast wire group frames travel as indications.
                cemi.message_code = MessageCode::LDataInd;
                communicator
                    .send(Body::RoutingIndication(RoutingIndicationBody { cemi }))
                    .await?;
                Ok(true)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
