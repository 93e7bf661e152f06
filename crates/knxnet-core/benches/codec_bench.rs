//! Criterion benchmarks for the KNX Net/IP frame codec.
//!
//! Measures encoding and decoding latency for the frame shapes the client
//! handles at rate: tunneling traffic on the hot path, plus the larger
//! discovery response with its DIB parsing.
//!
//! Run with:
//! ```bash
//! cargo bench --package knxnet-core --bench codec_bench
//! ```

use std::net::Ipv4Addr;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knxnet_core::protocol::body::{
    Body, ConnectionStateRequestBody, DeviceInfoDib, ErrorCode, Hpai, SearchResponseBody,
    ServiceFamiliesDib, ServiceFamily, TunnelingAckBody, TunnelingRequestBody, service_family,
};
use knxnet_core::protocol::codec::{decode_frame, encode_frame};
use knxnet_core::{CemiFrame, GroupAddress, IndividualAddress};

// ── Frame fixtures ────────────────────────────────────────────────────────────

fn make_tunneling_request() -> Body {
    Body::TunnelingRequest(TunnelingRequestBody {
        channel_id: 0x4E,
        sequence: 0x10,
        cemi: CemiFrame::group_write(GroupAddress::new(1, 2, 3).unwrap(), vec![0x01]).unwrap(),
    })
}

fn make_tunneling_request_wide_payload() -> Body {
    Body::TunnelingRequest(TunnelingRequestBody {
        channel_id: 0x4E,
        sequence: 0x11,
        cemi: CemiFrame::group_write(
            GroupAddress::new(1, 2, 3).unwrap(),
            vec![0xAA; 14], // maximum application data
        )
        .unwrap(),
    })
}

fn make_tunneling_ack() -> Body {
    Body::TunnelingAck(TunnelingAckBody {
        channel_id: 0x4E,
        sequence: 0x10,
        status: ErrorCode::NoError,
    })
}

fn make_connection_state_request() -> Body {
    Body::ConnectionStateRequest(ConnectionStateRequestBody {
        channel_id: 0x4E,
        control_endpoint: Hpai::unbound(),
    })
}

fn make_search_response() -> Body {
    Body::SearchResponse(SearchResponseBody {
        control_endpoint: Hpai::udp("192.168.1.1:3671".parse().unwrap()),
        device_info: DeviceInfoDib {
            medium: 0x02,
            device_status: 0x00,
            address: IndividualAddress::new(1, 1, 0).unwrap(),
            project_installation_id: 0,
            serial_number: [0x00, 0xC5, 0x01, 0x02, 0x03, 0x04],
            routing_multicast: Ipv4Addr::new(224, 0, 23, 12),
            mac_address: [0x00, 0x0E, 0x8C, 0x01, 0x02, 0x03],
            friendly_name: "benchmark gateway".to_string(),
        },
        service_families: ServiceFamiliesDib {
            families: vec![
                ServiceFamily { id: service_family::CORE, version: 1 },
                ServiceFamily { id: service_family::DEVICE_MANAGEMENT, version: 1 },
                ServiceFamily { id: service_family::TUNNELING, version: 1 },
                ServiceFamily { id: service_family::ROUTING, version: 1 },
            ],
        },
    })
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let frames: &[(&str, Body)] = &[
        ("TunnelingRequest", make_tunneling_request()),
        ("TunnelingRequest(14B)", make_tunneling_request_wide_payload()),
        ("TunnelingAck", make_tunneling_ack()),
        ("ConnectionStateRequest", make_connection_state_request()),
        ("SearchResponse", make_search_response()),
    ];

    let mut group = c.benchmark_group("encode_frame");
    for (name, body) in frames {
        group.bench_with_input(BenchmarkId::new("frame", name), body, |b, body| {
            b.iter(|| encode_frame(black_box(body)).expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frames: &[(&str, Body)] = &[
        ("TunnelingRequest", make_tunneling_request()),
        ("TunnelingRequest(14B)", make_tunneling_request_wide_payload()),
        ("TunnelingAck", make_tunneling_ack()),
        ("ConnectionStateRequest", make_connection_state_request()),
        ("SearchResponse", make_search_response()),
    ];

    let mut group = c.benchmark_group("decode_frame");
    for (name, body) in frames {
        let bytes = encode_frame(body).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("frame", name), &bytes, |b, bytes| {
            b.iter(|| decode_frame(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Full round-trip of the frame the data channel carries at rate.
fn bench_roundtrip_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_decode_roundtrip");

    let request = make_tunneling_request();
    group.bench_function("TunnelingRequest", |b| {
        b.iter(|| {
            let bytes = encode_frame(black_box(&request)).unwrap();
            decode_frame(black_box(&bytes)).unwrap()
        })
    });

    let ack = make_tunneling_ack();
    group.bench_function("TunnelingAck", |b| {
        b.iter(|| {
            let bytes = encode_frame(black_box(&ack)).unwrap();
            decode_frame(black_box(&bytes)).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip_hot_path);
criterion_main!(benches);
