//! Gateway discovery and description.
//!
//! Discovery multicasts a search request and collects every unicast search
//! response that arrives within the search window. Description opens a
//! short-lived unicast channel to one gateway and performs a single
//! request/response exchange. Both advertise the NAT wildcard convention
//! where the concrete local address is unknowable (bound to 0.0.0.0), so
//! gateways answer to the datagram source.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use knxnet_core::protocol::body::{
    affinity, Body, DescriptionRequestBody, DescriptionResponseBody, Hpai, SearchRequestBody,
    SearchResponseBody,
};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::application::event_pool::EventCell;
use crate::application::retry::RetryPolicy;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::infrastructure::network::channel::UdpChannel;
use crate::infrastructure::network::communicator::{ChannelCommunicator, FrameHandler};

/// Subscriber that funnels every received frame into one event cell.
pub(crate) struct CellForwarder {
    cell: Arc<EventCell>,
}

impl CellForwarder {
    pub(crate) fn new(cell: Arc<EventCell>) -> Arc<Self> {
        Arc::new(Self { cell })
    }
}

#[async_trait]
impl FrameHandler for CellForwarder {
    async fn on_frame(&self, body: Body) {
        self.cell.deliver(body);
    }
}

/// Searches the local network for KNX Net/IP gateways.
///
/// Returns every gateway that answered within the configured search
/// window; an empty result is a normal outcome on a quiet network.
pub async fn discover(config: &ClientConfig) -> Result<Vec<SearchResponseBody>, ClientError> {
    let multicast = config.connection.multicast_addr()?;
    let channel = UdpChannel::discovery(multicast).await?;
    let local_port = match channel.local_addr()? {
        SocketAddr::V4(a) => a.port(),
        SocketAddr::V6(a) => a.port(),
    };
    let communicator = ChannelCommunicator::start(channel, affinity::MULTICAST, &config.pool);

    let cell = Arc::new(EventCell::multi());
    communicator.subscribe(CellForwarder::new(Arc::clone(&cell)));

    let request = Body::SearchRequest(SearchRequestBody {
        // Wildcard address, concrete port: answer to the datagram source.
        discovery_endpoint: Hpai {
            port: local_port,
            ..Hpai::unbound()
        },
    });
    cell.begin_request(request.clone());
    communicator.send(request).await?;

    debug!(window = ?config.timeouts.search_window(), "collecting search responses");
    sleep(config.timeouts.search_window()).await;

    let found: Vec<SearchResponseBody> = cell
        .take_all()
        .into_iter()
        .filter_map(|body| match body {
            Body::SearchResponse(b) => Some(b),
            _ => None,
        })
        .collect();
    communicator.close();

    info!(gateways = found.len(), "discovery finished");
    Ok(found)
}

/// Reads the self-description of one gateway.
pub async fn describe(
    gateway: SocketAddrV4,
    config: &ClientConfig,
) -> Result<DescriptionResponseBody, ClientError> {
    let channel = UdpChannel::tunnel(gateway).await?;
    let communicator = ChannelCommunicator::start(channel, affinity::DESCRIPTION, &config.pool);

    let cell = Arc::new(EventCell::single());
    communicator.subscribe(CellForwarder::new(Arc::clone(&cell)));

    let request = Body::DescriptionRequest(DescriptionRequestBody {
        control_endpoint: Hpai::unbound(),
    });
    let policy = RetryPolicy {
        total_attempts: config.retry.total_attempts,
        timeout: config.timeouts.connect(),
        check_interval: config.retry.check_interval(),
    };
    let result = communicator
        .send_and_wait(request, &cell, |_| true, &policy)
        .await;
    communicator.close();

    match result? {
        Some(Body::DescriptionResponse(body)) => Ok(body),
        _ => Err(ClientError::NoResponse),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
