//! `knxnet-monitor`: connect to a gateway (or join the routing group) and
//! log every group-value frame seen on the bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use knxnet_client::{ClientConfig, FrameHandler, KnxClient};
use knxnet_core::dpt::{dpt1, dpt9};
use knxnet_core::protocol::body::Body;
use knxnet_core::protocol::cemi::CemiFrame;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logs decoded group traffic; everything else is the client's business.
struct GroupTrafficLogger;

#[async_trait]
impl FrameHandler for GroupTrafficLogger {
    async fn on_frame(&self, body: Body) {
        match body {
            Body::TunnelingRequest(request) => log_group_frame(&request.cemi),
            Body::RoutingIndication(indication) => log_group_frame(&indication.cemi),
            _ => {}
        }
    }
}

fn log_group_frame(cemi: &CemiFrame) {
    info!(
        source = %cemi.source,
        destination = %cemi.destination,
        apci = ?cemi.apci,
        value = %render_payload(&cemi.data),
        "group traffic"
    );
}

/// Best-effort human rendering: try the common datapoint type for the
/// payload size, fall back to hex.
fn render_payload(data: &[u8]) -> String {
    match data.len() {
        1 => match dpt1::decode(data) {
            Ok(v) => format!("{v} ({:#04x})", data[0]),
            Err(_) => format!("{:#04x}", data[0]),
        },
        2 => match dpt9::decode(data) {
            Ok(v) => format!("{v:.2} ({:02x?})", data),
            Err(_) => format!("{data:02x?}"),
        },
        _ => format!("{data:02x?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("knxnet-monitor.toml"));
    let config = ClientConfig::load_or_default(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if !path.exists() {
        config
            .save(&path)
            .with_context(|| format!("writing default config to {}", path.display()))?;
        info!(path = %path.display(), "wrote default config");
    }

    let routing = config.connection.routing;
    let client = if routing {
        info!(group = %config.connection.multicast_group, "joining routing multicast group");
        KnxClient::routing(config).await?
    } else {
        info!(gateway = %config.connection.gateway, "connecting to gateway");
        KnxClient::connect(config).await?
    };
    client.subscribe(Arc::new(GroupTrafficLogger));

    info!("monitoring group traffic, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    client.close().await;
    Ok(())
}
