//! End-to-end tunneling exchanges against a scripted loopback gateway.

use std::net::SocketAddr;
use std::time::Duration;

use knxnet_core::domain::address::{GroupAddress, IndividualAddress, KnxAddress};
use knxnet_core::protocol::body::{
    Body, ConnectResponseBody, ConnectionResponseData, ConnectionStateResponseBody,
    ConnectionType, DisconnectRequestBody, DisconnectResponseBody, ErrorCode, Hpai,
    TunnelingAckBody, TunnelingRequestBody,
};
use knxnet_core::protocol::cemi::{Apci, CemiFrame, MessageCode};
use knxnet_core::{decode_frame, encode_frame};
use knxnet_client::{ClientConfig, ClientError, KnxClient};
use tokio::net::UdpSocket;
use tokio::time::sleep;

const CHANNEL_ID: u8 = 21;

async fn reply(socket: &UdpSocket, to: SocketAddr, body: Body) {
    socket
        .send_to(&encode_frame(&body).unwrap(), to)
        .await
        .unwrap();
}

/// A gateway that accepts one tunnel, acks every data frame, and answers
/// group reads with the value 0x2A.
async fn run_gateway(socket: UdpSocket) {
    let mut push_sequence: u8 = 0;
    let mut buf = [0u8; 1024];
    loop {
        let Ok((n, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Ok(body) = decode_frame(&buf[..n]) else {
            continue;
        };
        match body {
            Body::ConnectRequest(_) => {
                let local = match socket.local_addr().unwrap() {
                    SocketAddr::V4(a) => a,
                    _ => unreachable!(),
                };
                reply(
                    &socket,
                    from,
                    Body::ConnectResponse(ConnectResponseBody {
                        channel_id: CHANNEL_ID,
                        status: ErrorCode::NoError,
                        data_endpoint: Some(Hpai::udp(local)),
                        crd: Some(ConnectionResponseData {
                            connection_type: ConnectionType::Tunnel,
                            assigned_address: IndividualAddress::new(1, 1, 250).unwrap(),
                        }),
                    }),
                )
                .await;
            }
            Body::ConnectionStateRequest(request) => {
                reply(
                    &socket,
                    from,
                    Body::ConnectionStateResponse(ConnectionStateResponseBody {
                        channel_id: request.channel_id,
                        status: ErrorCode::NoError,
                    }),
                )
                .await;
            }
            Body::DisconnectRequest(request) => {
                reply(
                    &socket,
                    from,
                    Body::DisconnectResponse(DisconnectResponseBody {
                        channel_id: request.channel_id,
                        status: ErrorCode::NoError,
                    }),
                )
                .await;
            }
            Body::TunnelingRequest(request) => {
                reply(
                    &socket,
                    from,
                    Body::TunnelingAck(TunnelingAckBody {
                        channel_id: request.channel_id,
                        sequence: request.sequence,
                        status: ErrorCode::NoError,
                    }),
                )
                .await;
                if request.cemi.apci == Apci::GroupValueRead {
                    let KnxAddress::Group(destination) = request.cemi.destination else {
                        continue;
                    };
                    let mut cemi = CemiFrame::group_response(destination, vec![0x2A]).unwrap();
                    cemi.message_code = MessageCode::LDataInd;
                    cemi.source = IndividualAddress::new(1, 1, 9).unwrap();
                    reply(
                        &socket,
                        from,
                        Body::TunnelingRequest(TunnelingRequestBody {
                            channel_id: request.channel_id,
                            sequence: push_sequence,
                            cemi,
                        }),
                    )
                    .await;
                    push_sequence = push_sequence.wrapping_add(1);
                }
            }
            _ => {}
        }
    }
}

async fn spawn_gateway() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(run_gateway(socket));
    addr
}

fn config_for(gateway: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connection.gateway = gateway.to_string();
    config
}

#[tokio::test]
async fn test_connect_write_read_disconnect() {
    // Arrange
    let gateway = spawn_gateway().await;
    let client = KnxClient::connect(config_for(gateway)).await.unwrap();
    let light = GroupAddress::new(1, 2, 3).unwrap();

    // Act / Assert – the write is acknowledged
    assert!(client.group_write(light, vec![0x01]).await.unwrap());

    // a read brings back the scripted answer
    let snapshot = client.group_read(light).await.unwrap().unwrap();
    assert_eq!(snapshot.data, vec![0x2A]);
    assert_eq!(snapshot.apci, Apci::GroupValueResponse);
    assert_eq!(snapshot.source, IndividualAddress::new(1, 1, 9).unwrap());

    // and stays cached for lock-free reads
    assert_eq!(client.read_status(light).unwrap().data, vec![0x2A]);

    client.close().await;
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_silent_gateway_yields_no_response() {
    // Arrange – a socket that swallows everything
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = config_for(socket.local_addr().unwrap());
    config.timeouts.connect_ms = 50;
    config.retry.total_attempts = 2;
    config.retry.check_interval_ms = 10;

    // Act
    let result = KnxClient::connect(config).await;

    // Assert
    assert!(matches!(result, Err(ClientError::NoResponse)));
}

#[tokio::test]
async fn test_rejected_connect_surfaces_error_code() {
    // Arrange – a gateway that is full
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let (n, from) = socket.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            decode_frame(&buf[..n]).unwrap(),
            Body::ConnectRequest(_)
        ));
        reply(
            &socket,
            from,
            Body::ConnectResponse(ConnectResponseBody {
                channel_id: 0,
                status: ErrorCode::NoMoreConnections,
                data_endpoint: None,
                crd: None,
            }),
        )
        .await;
    });

    // Act
    let result = KnxClient::connect(config_for(addr)).await;

    // Assert
    assert!(matches!(
        result,
        Err(ClientError::Rejected {
            code: ErrorCode::NoMoreConnections
        })
    ));
}

#[tokio::test]
async fn test_gateway_initiated_disconnect_closes_client() {
    // Arrange – a gateway we can also send from afterwards
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = socket.local_addr().unwrap();
    let (peer_tx, peer_rx) = tokio::sync::oneshot::channel::<SocketAddr>();
    tokio::spawn(async move {
        let mut peer_tx = Some(peer_tx);
        let mut buf = [0u8; 1024];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if let Some(tx) = peer_tx.take() {
                let _ = tx.send(from);
            }
            let Ok(body) = decode_frame(&buf[..n]) else {
                continue;
            };
            match body {
                Body::ConnectRequest(_) => {
                    let local = match socket.local_addr().unwrap() {
                        SocketAddr::V4(a) => a,
                        _ => unreachable!(),
                    };
                    reply(
                        &socket,
                        from,
                        Body::ConnectResponse(ConnectResponseBody {
                            channel_id: CHANNEL_ID,
                            status: ErrorCode::NoError,
                            data_endpoint: Some(Hpai::udp(local)),
                            crd: Some(ConnectionResponseData {
                                connection_type: ConnectionType::Tunnel,
                                assigned_address: IndividualAddress::new(1, 1, 250).unwrap(),
                            }),
                        }),
                    )
                    .await;
                    // Immediately regret it.
                    reply(
                        &socket,
                        from,
                        Body::DisconnectRequest(DisconnectRequestBody {
                            channel_id: CHANNEL_ID,
                            control_endpoint: Hpai::unbound(),
                        }),
                    )
                    .await;
                }
                _ => {}
            }
        }
    });

    // Act
    let client = KnxClient::connect(config_for(gateway_addr)).await.unwrap();
    let _ = peer_rx.await;

    // Assert – the supervisor closes the client without our involvement
    let mut closed = false;
    for _ in 0..100 {
        if client.is_closed() {
            closed = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(closed, "client never observed the gateway disconnect");
}
