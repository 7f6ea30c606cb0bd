//! Hot-path benchmarks for vvc-rtp.
//!
//! Measures:
//! - Annex-B scanning
//! - Payloader.push() per access unit (single, fragmented, aggregated)
//! - Depayloader.push() per packet
//!
//! Run with: cargo bench --package vvc-rtp

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Duration;

use vvc_rtp::config::{AggregateMode, Alignment, DepayloaderConfig, PayloaderConfig};
use vvc_rtp::depayloader::Depayloader;
use vvc_rtp::nal::{AnnexBReader, START_CODE};
use vvc_rtp::payloader::{Payloader, VideoBuffer};
use vvc_rtp::rtp::RtpPacket;

fn nal_unit(nal_type: u8, len: usize) -> Vec<u8> {
    let mut v = vec![0xA5u8; len];
    v[0] = 0x00;
    v[1] = (nal_type << 3) | 1;
    v
}

/// VPS + SPS + PPS + IDR slice of `slice_len` bytes.
fn keyframe(slice_len: usize) -> Bytes {
    let mut buf = BytesMut::new();
    for unit in [
        nal_unit(14, 24),
        nal_unit(15, 60),
        nal_unit(16, 12),
        nal_unit(8, slice_len),
    ] {
        buf.extend_from_slice(&START_CODE);
        buf.extend_from_slice(&unit);
    }
    buf.freeze()
}

fn config(aggregate_mode: AggregateMode) -> PayloaderConfig {
    PayloaderConfig {
        aggregate_mode,
        alignment: Alignment::Au,
        ..Default::default()
    }
}

// ─── Annex B ─────────────────────────────────────────────────────────────

fn bench_annex_b(c: &mut Criterion) {
    let au = keyframe(100_000);
    let mut group = c.benchmark_group("annex_b");
    group.throughput(Throughput::Bytes(au.len() as u64));
    group.bench_function("scan_100k", |b| {
        b.iter(|| AnnexBReader::new(black_box(au.clone())).count());
    });
    group.finish();
}

// ─── Payloader ───────────────────────────────────────────────────────────

fn bench_payloader(c: &mut Criterion) {
    let mut group = c.benchmark_group("payloader");
    group.throughput(Throughput::Elements(1));

    for (name, slice_len, mode) in [
        ("small_au_none", 800, AggregateMode::None),
        ("small_au_max", 800, AggregateMode::Max),
        ("large_au_zero_latency", 60_000, AggregateMode::ZeroLatency),
    ] {
        let au = keyframe(slice_len);
        group.bench_function(name, |b| {
            let mut pay = Payloader::new(config(mode)).unwrap();
            let mut pts = Duration::ZERO;
            b.iter(|| {
                pts += Duration::from_millis(40);
                let buffer = VideoBuffer::new(au.clone()).with_pts(pts).with_marker(true);
                black_box(pay.push(buffer));
            });
        });
    }

    group.finish();
}

// ─── Depayloader ─────────────────────────────────────────────────────────

fn bench_depayloader(c: &mut Criterion) {
    // Pre-packetise one large AU so we have valid wire packets
    let mut pay = Payloader::new(config(AggregateMode::ZeroLatency)).unwrap();
    let packets: Vec<RtpPacket> = pay.push(
        VideoBuffer::new(keyframe(60_000))
            .with_pts(Duration::ZERO)
            .with_marker(true),
    );

    let mut group = c.benchmark_group("depayloader");
    group.throughput(Throughput::Elements(packets.len() as u64));
    group.bench_function("large_au", |b| {
        let mut depay = Depayloader::new(DepayloaderConfig::default()).unwrap();
        b.iter(|| {
            for pkt in &packets {
                black_box(depay.push(black_box(pkt)).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_annex_b, bench_payloader, bench_depayloader);
criterion_main!(benches);
