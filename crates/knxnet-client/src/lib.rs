//! KNX Net/IP client: tunneling and routing connections to a KNX
//! installation over UDP.
//!
//! The crate is split the usual way: `infrastructure` owns sockets and the
//! frame pumps on top of them, `application` owns the protocol-agnostic
//! machinery (correlation, retry, heartbeat, status cache), and
//! [`client::KnxClient`] ties the two together behind one facade.
//!
//! ```no_run
//! use knxnet_client::{ClientConfig, KnxClient};
//! use knxnet_core::GroupAddress;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KnxClient::connect(ClientConfig::default()).await?;
//! let light = GroupAddress::new(1, 2, 3)?;
//! client.group_write(light, vec![0x01]).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod client;
pub mod config;
pub mod error;
pub mod infrastructure;

pub use application::status_pool::{StatusPool, StatusSnapshot};
pub use application::ClientEvent;
pub use client::KnxClient;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use infrastructure::network::discovery::{describe, discover};
pub use infrastructure::network::FrameHandler;
