//! # Integration tests: Payloader ↔ Depayloader through RTP
//!
//! Payloader → RTP encode → RTP decode → Depayloader → access units.
//!
//! No network I/O; packets are handed over as bytes. Loss is simulated by
//! dropping packets in the middle.

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use vvc_rtp::config::{AggregateMode, Alignment, ConfigInterval, DepayloaderConfig, PayloaderConfig};
use vvc_rtp::depayloader::{AccessUnit, Depayloader};
use vvc_rtp::nal::{self, NalUnitType, START_CODE};
use vvc_rtp::payloader::{Payloader, VideoBuffer};
use vvc_rtp::rtp::RtpPacket;
use vvc_rtp::ControlEvent;

// ─── Helpers ────────────────────────────────────────────────────────────────

const VPS: u8 = 14;
const SPS: u8 = 15;
const PPS: u8 = 16;
const IDR: u8 = 8;
const TRAIL: u8 = 0;

/// NAL unit of `len` bytes with a distinguishable, start-code-free body.
fn nal_unit(nal_type: u8, len: usize, fill: u8) -> Vec<u8> {
    assert!(fill > 1);
    let mut v = vec![fill; len];
    v[0] = 0x00;
    v[1] = (nal_type << 3) | 1;
    v
}

fn annex_b(units: &[Vec<u8>]) -> Bytes {
    let mut buf = BytesMut::new();
    for u in units {
        buf.extend_from_slice(&START_CODE);
        buf.extend_from_slice(u);
    }
    buf.freeze()
}

fn au_config(aggregate_mode: AggregateMode, mtu: usize) -> PayloaderConfig {
    PayloaderConfig {
        mtu,
        aggregate_mode,
        alignment: Alignment::Au,
        ..Default::default()
    }
}

/// Packetise AU-aligned frames (units, pts in ms), end of stream included.
fn packetize(config: PayloaderConfig, frames: &[(Vec<Vec<u8>>, u64)]) -> Vec<RtpPacket> {
    let mut pay = Payloader::new(config).unwrap();
    let mut packets = Vec::new();
    for (units, pts_ms) in frames {
        let buffer = VideoBuffer::new(annex_b(units))
            .with_pts(Duration::from_millis(*pts_ms))
            .with_marker(true);
        packets.extend(pay.push(buffer));
    }
    packets.extend(pay.handle_event(ControlEvent::EndOfStream));
    packets
}

/// Send packets over the "wire" and reassemble them.
fn depacketize(packets: &[RtpPacket]) -> (Vec<AccessUnit>, Depayloader) {
    let mut depay = Depayloader::new(DepayloaderConfig::default()).unwrap();
    let mut aus = Vec::new();
    for pkt in packets {
        let decoded = RtpPacket::decode(pkt.encode().freeze()).unwrap();
        aus.extend(depay.push(&decoded).unwrap());
    }
    aus.extend(depay.handle_event(ControlEvent::EndOfStream));
    (aus, depay)
}

fn units_of(au: &AccessUnit) -> Vec<Vec<u8>> {
    au.nal_units().map(|b| b.to_vec()).collect()
}

fn types_of(au: &AccessUnit) -> Vec<u8> {
    au.nal_units().map(|b| b[1] >> 3).collect()
}

fn packet_type(pkt: &RtpPacket) -> NalUnitType {
    NalUnitType::from_u8(pkt.payload[1] >> 3)
}

fn sample_stream() -> Vec<(Vec<Vec<u8>>, u64)> {
    vec![
        (
            vec![
                nal_unit(VPS, 20, 0x11),
                nal_unit(SPS, 15, 0x12),
                nal_unit(PPS, 10, 0x13),
                nal_unit(IDR, 3000, 0x14),
            ],
            0,
        ),
        (vec![nal_unit(TRAIL, 700, 0x15), nal_unit(TRAIL, 40, 0x16)], 40),
        (vec![nal_unit(TRAIL, 90, 0x17)], 80),
    ]
}

// ─── Round Trip ─────────────────────────────────────────────────────────────

fn assert_round_trip(config: PayloaderConfig) -> Vec<RtpPacket> {
    let frames = sample_stream();
    let packets = packetize(config.clone(), &frames);
    for pkt in &packets {
        assert!(pkt.len() <= config.mtu, "packet of {} bytes", pkt.len());
    }

    let (aus, depay) = depacketize(&packets);
    assert_eq!(aus.len(), frames.len());
    for (au, (units, pts_ms)) in aus.iter().zip(&frames) {
        assert_eq!(&units_of(au), units);
        assert!(au.marker);
        assert_eq!(au.timestamp, (*pts_ms as u32) * 90);
    }
    assert!(aus[0].keyframe);
    assert!(!aus[1].keyframe);
    assert_eq!(depay.stats().sequence_gaps, 0);
    assert_eq!(depay.stats().malformed_nal_units, 0);
    packets
}

#[test]
fn round_trip_single_units() {
    let packets = assert_round_trip(au_config(AggregateMode::None, 4000));
    assert!(packets.iter().all(|p| {
        let t = packet_type(p);
        t != NalUnitType::Ap && t != NalUnitType::Fu
    }));
    assert_eq!(packets.len(), 7);
}

#[test]
fn round_trip_fragmented() {
    let packets = assert_round_trip(au_config(AggregateMode::None, 300));
    let fus = packets
        .iter()
        .filter(|p| packet_type(p) == NalUnitType::Fu)
        .count();
    // IDR: 2998 / 285 → 11, first TRAIL: 698 / 285 → 3
    assert_eq!(fus, 14);
}

#[test]
fn round_trip_aggregated() {
    let packets = assert_round_trip(au_config(AggregateMode::Max, 1400));
    assert_eq!(packet_type(&packets[0]), NalUnitType::Ap);
    assert!(packets.iter().any(|p| packet_type(p) == NalUnitType::Fu));
}

#[test]
fn classification_is_independent_of_packetization() {
    let configs = [
        au_config(AggregateMode::None, 4000),
        au_config(AggregateMode::None, 300),
        au_config(AggregateMode::Max, 1400),
        au_config(AggregateMode::ZeroLatency, 1400),
    ];
    let mut seen = Vec::new();
    for config in configs {
        let (aus, _) = depacketize(&packetize(config, &sample_stream()));
        let types: Vec<Vec<u8>> = aus.iter().map(types_of).collect();
        let keyframes: Vec<bool> = aus.iter().map(|a| a.keyframe).collect();
        seen.push((types, keyframes));
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn rtp_timestamps_follow_pts() {
    let packets = packetize(au_config(AggregateMode::None, 1400), &sample_stream());
    let last_of_each_au: Vec<u32> = packets.iter().filter(|p| p.marker).map(|p| p.timestamp).collect();
    assert_eq!(last_of_each_au, vec![0, 3600, 7200]);
    for w in packets.windows(2) {
        assert_eq!(w[0].sequence.wrapping_add(1), w[1].sequence);
    }
}

// ─── Aggregation ────────────────────────────────────────────────────────────

fn parameter_sets_and_slice() -> Vec<(Vec<Vec<u8>>, u64)> {
    vec![(
        vec![
            nal_unit(VPS, 20, 0x21),
            nal_unit(SPS, 15, 0x22),
            nal_unit(PPS, 10, 0x23),
            nal_unit(IDR, 800, 0x24),
        ],
        0,
    )]
}

#[test]
fn zero_latency_aggregates_parameter_sets_only() {
    let packets = packetize(
        au_config(AggregateMode::ZeroLatency, 1400),
        &parameter_sets_and_slice(),
    );
    assert_eq!(packets.len(), 2);

    let ap = &packets[0];
    assert_eq!(packet_type(ap), NalUnitType::Ap);
    assert!(!ap.marker);
    assert_eq!(ap.payload.len(), 2 + 3 * 2 + 20 + 15 + 10);
    assert_eq!(&ap.payload[2..4], &[0x00, 20]);

    assert_eq!(packet_type(&packets[1]), NalUnitType::IdrNLp);
    assert!(packets[1].marker);
    assert_eq!(packets[1].payload.len(), 800);
}

#[test]
fn max_aggregates_whole_access_unit() {
    let packets = packetize(au_config(AggregateMode::Max, 1400), &parameter_sets_and_slice());
    assert_eq!(packets.len(), 1);
    assert_eq!(packet_type(&packets[0]), NalUnitType::Ap);
    assert!(packets[0].marker);
    assert_eq!(packets[0].payload.len(), 2 + 4 * 2 + 845);

    let (aus, _) = depacketize(&packets);
    assert_eq!(aus.len(), 1);
    assert_eq!(types_of(&aus[0]), vec![VPS, SPS, PPS, IDR]);
}

#[test]
fn lone_aggregatable_unit_goes_out_as_single_unit() {
    let frames = vec![(vec![nal_unit(20, 2, 0x30), nal_unit(TRAIL, 100, 0x31)], 0)];
    let packets = packetize(au_config(AggregateMode::ZeroLatency, 1400), &frames);
    assert_eq!(packets.len(), 2);
    assert_eq!(packet_type(&packets[0]), NalUnitType::Aud);
    assert_eq!(packet_type(&packets[1]), NalUnitType::Trail);
}

// ─── Parameter-Set Insertion ────────────────────────────────────────────────

#[test]
fn parameter_sets_reinserted_before_idr() {
    let frames = vec![
        (
            vec![nal_unit(SPS, 12, 0x41), nal_unit(PPS, 8, 0x42), nal_unit(IDR, 200, 0x43)],
            0,
        ),
        (vec![nal_unit(TRAIL, 100, 0x44)], 40),
        (vec![nal_unit(IDR, 200, 0x45)], 80),
        // Two IDR slices of one picture.
        (vec![nal_unit(IDR, 100, 0x46), nal_unit(IDR, 100, 0x47)], 120),
    ];
    let config = PayloaderConfig {
        config_interval: ConfigInterval::OnKeyframe,
        ..au_config(AggregateMode::None, 1400)
    };
    let (aus, _) = depacketize(&packetize(config, &frames));
    assert_eq!(aus.len(), 4);

    assert_eq!(types_of(&aus[0]), vec![SPS, PPS, IDR]);
    assert_eq!(types_of(&aus[1]), vec![TRAIL]);
    assert!(!aus[1].keyframe);
    assert_eq!(types_of(&aus[2]), vec![SPS, PPS, IDR]);
    assert!(aus[2].keyframe);
    assert_eq!(units_of(&aus[2])[0], nal_unit(SPS, 12, 0x41));
    assert_eq!(types_of(&aus[3]), vec![SPS, PPS, IDR, IDR]);
}

#[test]
fn parameter_sets_reinserted_periodically() {
    let frames = vec![
        (
            vec![nal_unit(SPS, 12, 0x51), nal_unit(PPS, 8, 0x52), nal_unit(IDR, 200, 0x53)],
            0,
        ),
        (vec![nal_unit(TRAIL, 100, 0x54)], 500),
        (vec![nal_unit(TRAIL, 100, 0x55)], 1000),
        (vec![nal_unit(TRAIL, 100, 0x56)], 1500),
    ];
    let config = PayloaderConfig {
        config_interval: ConfigInterval::Every(Duration::from_secs(1)),
        ..au_config(AggregateMode::None, 1400)
    };
    let (aus, _) = depacketize(&packetize(config, &frames));
    assert_eq!(types_of(&aus[1]), vec![TRAIL]);
    assert_eq!(types_of(&aus[2]), vec![SPS, PPS, TRAIL]);
    assert_eq!(types_of(&aus[3]), vec![TRAIL]);
}

#[test]
fn in_band_parameter_sets_with_nal_aligned_input() {
    // One NAL unit per buffer, so the slice of each AU is held back while
    // the next AU's in-band parameter sets arrive.
    let frames: Vec<(Vec<Vec<u8>>, u64)> = vec![
        (
            vec![
                nal_unit(VPS, 20, 0x71),
                nal_unit(SPS, 15, 0x72),
                nal_unit(PPS, 10, 0x73),
                nal_unit(IDR, 200, 0x74),
            ],
            0,
        ),
        (
            vec![
                nal_unit(VPS, 20, 0x71),
                nal_unit(SPS, 15, 0x72),
                nal_unit(PPS, 10, 0x73),
                nal_unit(IDR, 200, 0x75),
            ],
            40,
        ),
        // No in-band sets: the cached ones go in front of the IDR.
        (vec![nal_unit(IDR, 200, 0x76)], 80),
    ];
    let config = PayloaderConfig {
        config_interval: ConfigInterval::OnKeyframe,
        ..Default::default()
    };
    assert_eq!(config.alignment, Alignment::Nal);

    let mut pay = Payloader::new(config).unwrap();
    let mut packets = Vec::new();
    for (units, pts_ms) in &frames {
        for unit in units {
            let buffer = VideoBuffer::new(annex_b(std::slice::from_ref(unit)))
                .with_pts(Duration::from_millis(*pts_ms));
            packets.extend(pay.push(buffer));
        }
    }
    packets.extend(pay.handle_event(ControlEvent::EndOfStream));

    let wire: Vec<(u8, u32)> = packets
        .iter()
        .map(|p| (packet_type(p).as_u8(), p.timestamp))
        .collect();
    assert_eq!(
        wire,
        vec![
            (VPS, 0),
            (SPS, 0),
            (PPS, 0),
            (IDR, 0),
            (VPS, 3600),
            (SPS, 3600),
            (PPS, 3600),
            (IDR, 3600),
            (VPS, 7200),
            (SPS, 7200),
            (PPS, 7200),
            (IDR, 7200),
        ]
    );
    assert_eq!(pay.stats().parameter_sets_inserted, 3);

    let markers: Vec<usize> = packets
        .iter()
        .enumerate()
        .filter(|(_, p)| p.marker)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(markers, vec![3, 7, 11]);

    let (aus, _) = depacketize(&packets);
    assert_eq!(aus.len(), 3);
    for au in &aus {
        assert_eq!(types_of(au), vec![VPS, SPS, PPS, IDR]);
        assert!(au.keyframe);
    }
    assert_eq!(&units_of(&aus[2])[..3], &frames[1].0[..3]);
}

#[test]
fn stream_start_forgets_parameter_sets() {
    let config = PayloaderConfig {
        config_interval: ConfigInterval::OnKeyframe,
        ..au_config(AggregateMode::None, 1400)
    };
    let mut pay = Payloader::new(config).unwrap();
    pay.push(
        VideoBuffer::new(annex_b(&[nal_unit(SPS, 12, 0x61), nal_unit(IDR, 50, 0x62)]))
            .with_pts(Duration::ZERO)
            .with_marker(true),
    );
    pay.handle_event(ControlEvent::StreamStart);
    let out = pay.push(
        VideoBuffer::new(annex_b(&[nal_unit(IDR, 50, 0x63)]))
            .with_pts(Duration::from_millis(40))
            .with_marker(true),
    );
    assert_eq!(out.len(), 1);
    assert_eq!(pay.stats().parameter_sets_inserted, 0);
}

// ─── Loss ───────────────────────────────────────────────────────────────────

#[test]
fn lost_fragment_drops_only_its_unit() {
    let frames = vec![
        (vec![nal_unit(IDR, 202, 0x71)], 0),
        (vec![nal_unit(TRAIL, 50, 0x72)], 40),
    ];
    let mut packets = packetize(au_config(AggregateMode::None, 100), &frames);
    assert_eq!(packets.len(), 4);
    packets.remove(1);

    let (aus, depay) = depacketize(&packets);
    assert_eq!(aus.len(), 1);
    assert_eq!(units_of(&aus[0]), vec![nal_unit(TRAIL, 50, 0x72)]);
    assert_eq!(depay.stats().sequence_gaps, 1);
    assert_eq!(depay.stats().fragments_discarded, 1);
}

#[test]
fn lost_first_fragment_is_detected() {
    let frames = vec![
        (vec![nal_unit(IDR, 202, 0x81)], 0),
        (vec![nal_unit(TRAIL, 50, 0x82)], 40),
    ];
    let mut packets = packetize(au_config(AggregateMode::None, 100), &frames);
    packets.remove(0);

    let (aus, depay) = depacketize(&packets);
    assert_eq!(aus.len(), 1);
    assert_eq!(depay.stats().missing_fragment_starts, 2);
}

// ─── Unaligned Input ────────────────────────────────────────────────────────

#[test]
fn nal_aligned_input_splits_on_timestamps() {
    let mut pay = Payloader::new(PayloaderConfig {
        aggregate_mode: AggregateMode::ZeroLatency,
        ..Default::default()
    })
    .unwrap();
    let mut packets = Vec::new();
    let units = [
        (nal_unit(SPS, 12, 0x91), 0),
        (nal_unit(IDR, 300, 0x92), 0),
        (nal_unit(TRAIL, 300, 0x93), 40),
        (nal_unit(TRAIL, 300, 0x94), 80),
    ];
    for (unit, pts_ms) in &units {
        let buffer = VideoBuffer::new(annex_b(std::slice::from_ref(unit)))
            .with_pts(Duration::from_millis(*pts_ms));
        packets.extend(pay.push(buffer));
    }
    assert_eq!(pay.pending_nal_units(), 1);
    packets.extend(pay.handle_event(ControlEvent::EndOfStream));

    let markers: Vec<bool> = packets.iter().map(|p| p.marker).collect();
    assert_eq!(markers, vec![false, true, true, true]);

    let (aus, _) = depacketize(&packets);
    assert_eq!(aus.len(), 3);
    assert_eq!(types_of(&aus[0]), vec![SPS, IDR]);
}

#[test]
fn annex_b_file_splitting_matches_payloader_input() {
    let frames = vec![
        vec![nal_unit(VPS, 20, 0xA1), nal_unit(SPS, 15, 0xA2), nal_unit(IDR, 300, 0xA3)],
        // Picture header, then two slices of the same picture.
        vec![nal_unit(19, 4, 0xA4), nal_unit(TRAIL, 100, 0xA5), nal_unit(TRAIL, 90, 0xA6)],
        vec![nal_unit(20, 2, 0xA7), nal_unit(TRAIL, 80, 0xA8), nal_unit(24, 6, 0xA9)],
    ];
    let mut stream = BytesMut::new();
    for units in &frames {
        stream.extend_from_slice(&annex_b(units));
    }
    let aus = nal::split_access_units(stream.freeze());
    assert_eq!(aus.len(), frames.len());
    for (au, units) in aus.iter().zip(&frames) {
        assert_eq!(au, &annex_b(units));
    }
}

// ─── Limits ─────────────────────────────────────────────────────────────────

#[test]
fn units_too_large_for_an_aggregation_entry_round_trip() {
    let frames = vec![(
        vec![nal_unit(TRAIL, 70_000, 0x7A), nal_unit(TRAIL, 10, 0x7B)],
        0,
    )];
    let packets = packetize(au_config(AggregateMode::Max, 200_000), &frames);
    assert!(packets.iter().all(|p| packet_type(p) != NalUnitType::Ap));

    let (aus, _) = depacketize(&packets);
    assert_eq!(aus.len(), 1);
    assert_eq!(units_of(&aus[0]), frames[0].0);
}
