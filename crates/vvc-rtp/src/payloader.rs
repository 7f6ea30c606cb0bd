//! # Payloader State Machine
//!
//! Pure logic, no I/O. Accepts Annex-B buffers, splits them into NAL units
//! and produces RTP packets in one of three RFC 9328 shapes.
//!
//! ## Responsibilities
//!
//! 1. **Parsing**: split buffers on start codes, classify every NAL unit
//! 2. **Parameter sets**: cache VPS/SPS/PPS/APS and re-insert them in band
//! 3. **AU boundaries**: decide which unit closes an AU (RTP marker bit)
//! 4. **Packetisation**: Single Unit, Aggregation Packet or Fragmentation Units
//!
//! The last pending NAL unit is held back until it is known whether it ends
//! its AU, so the marker can be set on the right packet. End of stream
//! releases it.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;

use crate::boundary::AuBoundaryDetector;
use crate::config::{AggregateMode, Alignment, PayloaderConfig};
use crate::error::ConfigError;
use crate::nal::{self, AnnexBReader, NalUnit};
use crate::ps_cache::ParameterSetCache;
use crate::rtp::{RtpClock, RtpPacket, SequenceGenerator, RTP_HEADER_LEN};
use crate::stats::PayloaderStats;
use crate::wire::{self, FuHeader, FU_HEADER_LEN};
use crate::ControlEvent;

// ─── Input ──────────────────────────────────────────────────────────────────

/// One input buffer: Annex-B data holding one or more complete NAL units.
#[derive(Debug, Clone, Default)]
pub struct VideoBuffer {
    pub data: Bytes,
    pub pts: Option<Duration>,
    pub dts: Option<Duration>,
    /// The buffer ends an AU.
    pub marker: bool,
}

impl VideoBuffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        VideoBuffer {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }
}

// ─── Aggregation Buffer ─────────────────────────────────────────────────────

/// NAL units waiting to go out together in one AP. Never spans two AUs.
#[derive(Debug, Default)]
struct AggregationBuffer {
    units: Vec<NalUnit>,
    nal_bytes: usize,
}

impl AggregationBuffer {
    fn push(&mut self, nal: NalUnit) {
        self.nal_bytes += nal.size();
        self.units.push(nal);
    }

    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn last_mut(&mut self) -> Option<&mut NalUnit> {
        self.units.last_mut()
    }

    /// The last member closes its AU, so nothing else may join.
    fn has_au(&self) -> bool {
        self.units.last().is_some_and(|n| n.au_end)
    }

    /// RTP packet size if `nal` joined.
    fn packet_len_with(&self, nal: &NalUnit) -> usize {
        RTP_HEADER_LEN + wire::ap_payload_len(self.units.len() + 1, self.nal_bytes + nal.size())
    }

    fn take(&mut self) -> Vec<NalUnit> {
        self.nal_bytes = 0;
        std::mem::take(&mut self.units)
    }
}

// ─── Payloader ──────────────────────────────────────────────────────────────

pub struct Payloader {
    config: PayloaderConfig,
    boundary: AuBoundaryDetector,
    ps_cache: ParameterSetCache,
    /// Parsed units not yet packetised.
    pending: VecDeque<NalUnit>,
    aggregate: AggregationBuffer,
    sequence: SequenceGenerator,
    clock: RtpClock,
    stats: PayloaderStats,
    span: tracing::Span,
}

impl Payloader {
    pub fn new(config: PayloaderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let span = tracing::debug_span!("vvc_pay", ssrc = config.ssrc);
        Ok(Payloader {
            boundary: AuBoundaryDetector::new(config.alignment),
            ps_cache: ParameterSetCache::new(config.config_interval),
            pending: VecDeque::new(),
            aggregate: AggregationBuffer::default(),
            sequence: SequenceGenerator::new(config.seqnum_offset),
            clock: RtpClock::new(config.clock_rate, config.timestamp_offset),
            stats: PayloaderStats::new(),
            span,
            config,
        })
    }

    /// Log under `span` instead of the default `vvc_pay` span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PayloaderConfig {
        &self.config
    }

    pub fn stats(&self) -> &PayloaderStats {
        &self.stats
    }

    /// Sequence number of the next packet.
    pub fn next_sequence(&self) -> u16 {
        self.sequence.current()
    }

    /// Number of NAL units held back waiting for more input.
    pub fn pending_nal_units(&self) -> usize {
        self.pending.len() + self.aggregate.len()
    }

    /// Latency this payloader adds for a stream at `framerate` (num, den).
    ///
    /// Only `max` aggregation on AU-aligned input waits for the next frame.
    pub fn latency(&self, framerate: Option<(u32, u32)>) -> Duration {
        let waits = self.config.aggregate_mode == AggregateMode::Max
            && self.config.alignment == Alignment::Au;
        match framerate {
            Some((num, den)) if waits && num > 0 && den > 0 => {
                Duration::from_nanos(1_000_000_000 * den as u64 / num as u64)
            }
            _ => Duration::ZERO,
        }
    }

    /// Feed one buffer and collect the packets that became ready.
    pub fn push(&mut self, buffer: VideoBuffer) -> Vec<RtpPacket> {
        let span = self.span.clone();
        let _guard = span.enter();

        let checked = self.pending.len();
        let mut added = 0;
        for data in AnnexBReader::new(buffer.data) {
            match nal::parse(data) {
                Ok(nal) => {
                    let nal = nal.with_timestamps(buffer.pts, buffer.dts);
                    tracing::trace!(nal_type = %nal.nal_type(), size = nal.size(), "NAL unit parsed");
                    self.ps_cache.observe(&nal);
                    self.pending.push_back(nal);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed NAL unit");
                    self.stats.malformed_nal_units += 1;
                }
            }
        }

        if added == 0 {
            tracing::warn!("no NAL unit found in buffer");
            return Vec::new();
        }
        self.stats.nal_units_in += added;
        if let Some(last) = self.pending.back_mut() {
            last.marker = buffer.marker;
        }

        self.drain(checked, false)
    }

    pub fn handle_event(&mut self, event: ControlEvent) -> Vec<RtpPacket> {
        let span = self.span.clone();
        let _guard = span.enter();

        match event {
            ControlEvent::EndOfStream => {
                tracing::debug!("end of stream, draining");
                let checked = self.pending.len();
                return self.drain(checked, true);
            }
            ControlEvent::Flush => self.discard_pending(),
            ControlEvent::StreamStart => self.ps_cache.clear(),
            ControlEvent::Reset => {
                self.discard_pending();
                self.ps_cache.clear();
            }
        }
        Vec::new()
    }

    fn discard_pending(&mut self) {
        let dropped = self.pending.len() + self.aggregate.len();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding pending NAL units");
        }
        self.stats.discarded_nal_units += dropped as u64;
        self.pending.clear();
        self.aggregate.take();
    }

    // ─── Packetisation ──────────────────────────────────────────────────

    /// Packetise `pending`. The first `checked` units were held back by the
    /// previous call and have already been considered for PS insertion.
    fn drain(&mut self, checked: usize, eos: bool) -> Vec<RtpPacket> {
        let mut out = Vec::new();

        let inserted = self.ps_cache.insert_into(&mut self.pending, checked);
        self.stats.parameter_sets_inserted += inserted as u64;
        self.boundary
            .mark(self.aggregate.last_mut(), &mut self.pending);

        if eos {
            match self.pending.back_mut() {
                Some(last) => last.au_end = true,
                None => {
                    if let Some(last) = self.aggregate.last_mut() {
                        last.au_end = true;
                    }
                }
            }
        }

        while let Some(nal) = self.pending.pop_front() {
            if self.can_aggregate(&nal) {
                tracing::debug!(nal_type = %nal.nal_type(), "NAL unit aggregated");
                self.aggregate.push(nal);
                continue;
            }

            if !self.aggregate.is_empty() {
                self.pending.push_front(nal);
                self.flush_aggregate(&mut out);
                continue;
            }

            if !eos && self.pending.is_empty() && !nal.au_end {
                tracing::debug!(nal_type = %nal.nal_type(), "holding last NAL unit");
                self.pending.push_front(nal);
                return out;
            }

            if RTP_HEADER_LEN + nal.size() <= self.config.mtu {
                self.push_single(nal, &mut out);
            } else {
                self.push_fragmented(nal, &mut out);
            }
        }

        if self.aggregate.has_au() {
            self.flush_aggregate(&mut out);
        }
        out
    }

    fn can_aggregate(&self, nal: &NalUnit) -> bool {
        let ty = nal.nal_type();
        match self.config.aggregate_mode {
            AggregateMode::None => return false,
            AggregateMode::ZeroLatency if ty.is_vcl() => return false,
            _ => {}
        }
        if ty.is_reserved() || ty.is_unspecified() || nal.size() > wire::AP_MAX_NAL_SIZE {
            return false;
        }
        if nal.au_start && !self.aggregate.is_empty() {
            return false;
        }
        self.aggregate.packet_len_with(nal) <= self.config.mtu
    }

    fn push_single(&mut self, nal: NalUnit, out: &mut Vec<RtpPacket>) {
        tracing::debug!(nal_type = %nal.nal_type(), size = nal.size(), marker = nal.au_end, "single unit");
        self.stats.single_unit_packets += 1;
        self.emit(nal.data().clone(), nal.au_end, nal.pts, out);
    }

    fn push_fragmented(&mut self, nal: NalUnit, out: &mut Vec<RtpPacket>) {
        let capacity = self.config.mtu - RTP_HEADER_LEN - FU_HEADER_LEN;
        let count = wire::fu_count(nal.size(), capacity);
        tracing::debug!(nal_type = %nal.nal_type(), size = nal.size(), fragments = count, "fragmenting");

        let rbsp = nal.rbsp();
        for (i, fragment) in rbsp.chunks(capacity).enumerate() {
            let last = i + 1 == count;
            let fu = FuHeader {
                start: i == 0,
                end: last,
                last_of_picture: last && nal.au_end,
                fu_type: nal.nal_type(),
            };
            let mut payload = BytesMut::with_capacity(FU_HEADER_LEN + fragment.len());
            wire::encode_fu(&mut payload, &nal.header, fu, fragment);
            self.stats.fragmentation_units += 1;
            self.emit(payload.freeze(), fu.last_of_picture, nal.pts, out);
        }
    }

    fn flush_aggregate(&mut self, out: &mut Vec<RtpPacket>) {
        let mut members = self.aggregate.take();
        if members.len() <= 1 {
            if let Some(only) = members.pop() {
                tracing::debug!("single-member aggregate sent as single unit");
                self.push_single(only, out);
            }
            return;
        }

        let (marker, pts) = match members.last() {
            Some(last) => (last.au_end, last.pts),
            None => return,
        };
        tracing::debug!(members = members.len(), marker, "aggregation packet");
        self.stats.aggregation_packets += 1;
        self.emit(wire::encode_ap(&members), marker, pts, out);
    }

    fn emit(&mut self, payload: Bytes, marker: bool, pts: Option<Duration>, out: &mut Vec<RtpPacket>) {
        let packet = RtpPacket {
            payload_type: self.config.payload_type,
            marker,
            sequence: self.sequence.next(),
            timestamp: self.clock.timestamp(pts),
            ssrc: self.config.ssrc,
            payload,
        };
        self.stats.packets_out += 1;
        self.stats.bytes_out += packet.len() as u64;
        out.push(packet);
    }
}
