//! # Depayloader State Machine
//!
//! Pure logic, no I/O. Accepts RTP packets in arrival order and reassembles
//! Annex-B access units (4-byte start codes).
//!
//! ## Responsibilities
//!
//! 1. **Classification**: Single NAL Unit, Aggregation Packet or Fragmentation Unit
//! 2. **Fragment Reassembly**: rebuild fragmented NAL units, drop them on loss
//! 3. **Picture Assembly**: collect NAL units until the RTP marker bit
//!
//! ## Fragmentation states
//!
//! ```text
//!            S=1                         E=1
//!   Idle ─────────────▶ InFragment ─────────────▶ Idle (NAL delivered)
//!                           │
//!                           ├── gap / no start ──▶ Idle (fragment dropped)
//!                           └── S=1 or non-FU ───▶ Idle (partial NAL delivered)
//! ```
//!
//! Data loss never surfaces as an error: it is logged, counted in
//! [`DepayloaderStats`] and the affected NAL unit is dropped.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::config::DepayloaderConfig;
use crate::error::{ConfigError, Error};
use crate::nal::{AnnexBReader, NalHeader, NalUnitType, NAL_HEADER_LEN, START_CODE};
use crate::rtp::{RtpPacket, TimestampUnwrapper};
use crate::stats::DepayloaderStats;
use crate::wire::{self, FuHeader, FU_HEADER_LEN, PAYLOAD_HDR_LEN};
use crate::ControlEvent;

// ─── Output ─────────────────────────────────────────────────────────────────

/// One reassembled access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Annex-B bytes, every NAL unit behind a 4-byte start code.
    pub data: Bytes,
    /// RTP timestamp of the last NAL unit.
    pub timestamp: u32,
    /// Running time since the first access unit of the stream.
    pub pts: Duration,
    /// Carries a VPS, SPS or PPS.
    pub keyframe: bool,
    /// Completed by the RTP marker bit rather than drained at end of stream.
    pub marker: bool,
}

impl AccessUnit {
    pub fn nal_units(&self) -> AnnexBReader {
        AnnexBReader::new(self.data.clone())
    }
}

// ─── Fragment Assembler ─────────────────────────────────────────────────────

#[derive(Debug)]
struct FragmentAssembly {
    /// Rebuilt NAL header followed by the fragments received so far.
    data: BytesMut,
    last_seq: u16,
    timestamp: u32,
    /// Marker bit of the most recent fragment.
    marker: bool,
}

#[derive(Debug, Default)]
enum FragmentationState {
    #[default]
    Idle,
    InFragment(FragmentAssembly),
}

// ─── Picture Accumulator ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PictureAccumulator {
    data: BytesMut,
    nal_units: u64,
    timestamp: Option<u32>,
    keyframe: bool,
}

impl PictureAccumulator {
    fn push(&mut self, nal: &[u8], timestamp: u32, keyframe: bool) {
        self.data.reserve(START_CODE.len() + nal.len());
        self.data.put_slice(&START_CODE);
        self.data.put_slice(nal);
        self.nal_units += 1;
        self.timestamp = Some(timestamp);
        self.keyframe |= keyframe;
    }

    fn is_empty(&self) -> bool {
        self.nal_units == 0
    }

    fn clear(&mut self) {
        self.data.clear();
        self.nal_units = 0;
        self.timestamp = None;
        self.keyframe = false;
    }
}

// ─── Depayloader ────────────────────────────────────────────────────────────

pub struct Depayloader {
    config: DepayloaderConfig,
    fragment: FragmentationState,
    picture: PictureAccumulator,
    unwrapper: TimestampUnwrapper,
    stats: DepayloaderStats,
    span: tracing::Span,
}

impl Depayloader {
    pub fn new(config: DepayloaderConfig) -> Result<Self, ConfigError> {
        if config.clock_rate == 0 {
            return Err(ConfigError::ClockRate);
        }
        Ok(Depayloader {
            fragment: FragmentationState::Idle,
            picture: PictureAccumulator::default(),
            unwrapper: TimestampUnwrapper::new(config.clock_rate),
            stats: DepayloaderStats::new(),
            span: tracing::debug_span!("vvc_depay"),
            config,
        })
    }

    /// Log under `span` instead of the default `vvc_depay` span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &DepayloaderConfig {
        &self.config
    }

    pub fn stats(&self) -> &DepayloaderStats {
        &self.stats
    }

    /// Whether a fragmented NAL unit is being reassembled.
    pub fn in_fragment(&self) -> bool {
        matches!(self.fragment, FragmentationState::InFragment(_))
    }

    /// Feed one packet and collect the access units it completed.
    ///
    /// Only [`Error::UnsupportedFeature`] is returned; it means the stream
    /// cannot be decoded by this build.
    pub fn push(&mut self, packet: &RtpPacket) -> Result<Vec<AccessUnit>, Error> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.stats.packets_in += 1;
        let mut out = Vec::new();

        let payload = &packet.payload;
        if payload.is_empty() {
            tracing::debug!(seq = packet.sequence, error = %Error::EmptyPacket, "dropping packet");
            self.stats.empty_packets += 1;
            return Ok(out);
        }
        if payload.len() < PAYLOAD_HDR_LEN {
            self.drop_malformed(payload.len(), PAYLOAD_HDR_LEN);
            return Ok(out);
        }

        let hdr = NalHeader::decode(payload[0], payload[1]);
        tracing::trace!(
            seq = packet.sequence,
            nal_type = %hdr.nal_type,
            marker = packet.marker,
            len = payload.len(),
            "packet"
        );

        if hdr.nal_type != NalUnitType::Fu && self.in_fragment() {
            tracing::warn!(seq = packet.sequence, "fragmented unit interrupted, flushing it");
            self.finish_fragment(true, &mut out);
        }

        match hdr.nal_type {
            NalUnitType::Ap => self.process_ap(packet, &mut out)?,
            NalUnitType::Fu => self.process_fu(packet, &mut out),
            _ => self.handle_nal(packet.payload.clone(), packet.timestamp, packet.marker, &mut out),
        }
        Ok(out)
    }

    pub fn handle_event(&mut self, event: ControlEvent) -> Vec<AccessUnit> {
        let span = self.span.clone();
        let _guard = span.enter();

        match event {
            ControlEvent::EndOfStream => {
                tracing::debug!("end of stream, draining");
                let mut out = Vec::new();
                self.finish_fragment(true, &mut out);
                out.extend(self.complete_au(false));
                out
            }
            ControlEvent::Flush | ControlEvent::StreamStart | ControlEvent::Reset => {
                self.reset();
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        if let FragmentationState::InFragment(_) = std::mem::take(&mut self.fragment) {
            self.stats.fragments_discarded += 1;
        }
        if !self.picture.is_empty() {
            tracing::debug!(nal_units = self.picture.nal_units, "discarding partial access unit");
        }
        self.picture.clear();
        self.unwrapper.reset();
    }

    fn drop_malformed(&mut self, len: usize, needed: usize) {
        let err = Error::MalformedNal { len, needed };
        tracing::warn!(error = %err, "dropping NAL unit");
        self.stats.malformed_nal_units += 1;
    }

    // ─── Packet kinds ───────────────────────────────────────────────────

    #[cfg(feature = "aggregation")]
    fn process_ap(&mut self, packet: &RtpPacket, out: &mut Vec<AccessUnit>) -> Result<(), Error> {
        let mut entries = Vec::new();
        for entry in wire::ApEntries::new(packet.payload.slice(PAYLOAD_HDR_LEN..)) {
            match entry {
                Ok(nal) => entries.push(nal),
                Err(err) => {
                    tracing::warn!(seq = packet.sequence, error = %err, "truncated aggregation packet");
                    self.stats.malformed_nal_units += 1;
                }
            }
        }
        tracing::debug!(seq = packet.sequence, entries = entries.len(), "aggregation packet");

        let count = entries.len();
        for (i, nal) in entries.into_iter().enumerate() {
            let marker = packet.marker && i + 1 == count;
            self.handle_nal(nal, packet.timestamp, marker, out);
        }
        Ok(())
    }

    #[cfg(not(feature = "aggregation"))]
    fn process_ap(&mut self, packet: &RtpPacket, _out: &mut Vec<AccessUnit>) -> Result<(), Error> {
        let err = Error::UnsupportedFeature {
            nal_type: NalUnitType::Ap.as_u8(),
        };
        tracing::error!(seq = packet.sequence, error = %err, "cannot depayload stream");
        Err(err)
    }

    fn process_fu(&mut self, packet: &RtpPacket, out: &mut Vec<AccessUnit>) {
        let payload = &packet.payload;
        if payload.len() < FU_HEADER_LEN {
            self.drop_malformed(payload.len(), FU_HEADER_LEN);
            return;
        }
        let fu = FuHeader::decode(payload[2]);
        let fragment = &payload[FU_HEADER_LEN..];
        let seq = packet.sequence;

        if fu.start {
            if self.in_fragment() {
                tracing::warn!(seq, "fragment start before previous end, flushing");
                self.finish_fragment(true, out);
            }
            let mut data = BytesMut::with_capacity(NAL_HEADER_LEN + fragment.len());
            data.put_slice(&wire::fu_nal_header([payload[0], payload[1]], fu));
            data.put_slice(fragment);
            tracing::debug!(seq, fu_type = %fu.fu_type, "fragment start");
            self.fragment = FragmentationState::InFragment(FragmentAssembly {
                data,
                last_seq: seq,
                timestamp: packet.timestamp,
                marker: packet.marker,
            });
        } else {
            match &mut self.fragment {
                FragmentationState::Idle => {
                    let err = Error::MissingFragmentStart { seq };
                    tracing::warn!(error = %err, "dropping fragment");
                    self.stats.missing_fragment_starts += 1;
                    self.stats.fragments_discarded += 1;
                    return;
                }
                FragmentationState::InFragment(asm) => {
                    let expected = asm.last_seq.wrapping_add(1);
                    if seq != expected {
                        let err = Error::SequenceGap { expected, got: seq };
                        tracing::warn!(error = %err, "dropping fragmented unit");
                        self.fragment = FragmentationState::Idle;
                        self.stats.sequence_gaps += 1;
                        self.stats.fragments_discarded += 1;
                        return;
                    }
                    asm.data.put_slice(fragment);
                    asm.last_seq = seq;
                    asm.marker = packet.marker;
                }
            }
        }

        if fu.end {
            self.finish_fragment(false, out);
        }
    }

    /// Deliver the fragmented unit being assembled, if any.
    fn finish_fragment(&mut self, forced: bool, out: &mut Vec<AccessUnit>) {
        let FragmentationState::InFragment(asm) = std::mem::take(&mut self.fragment) else {
            return;
        };
        if forced {
            self.stats.forced_fragment_flushes += 1;
        }
        tracing::debug!(len = asm.data.len(), forced, "fragmented unit complete");
        self.handle_nal(asm.data.freeze(), asm.timestamp, asm.marker, out);
    }

    // ─── Picture assembly ───────────────────────────────────────────────

    fn handle_nal(&mut self, nal: Bytes, timestamp: u32, marker: bool, out: &mut Vec<AccessUnit>) {
        if nal.len() < NAL_HEADER_LEN {
            self.drop_malformed(nal.len(), NAL_HEADER_LEN);
            return;
        }
        let nal_type = NalUnitType::from_u8(nal[1] >> 3);
        self.picture.push(&nal, timestamp, nal_type.is_sequence_config());

        if marker {
            out.extend(self.complete_au(true));
        }
    }

    fn complete_au(&mut self, marker: bool) -> Option<AccessUnit> {
        let timestamp = self.picture.timestamp?;
        let au = AccessUnit {
            data: self.picture.data.split().freeze(),
            timestamp,
            pts: self.unwrapper.running_time(timestamp),
            keyframe: self.picture.keyframe,
            marker,
        };

        self.stats.access_units_out += 1;
        self.stats.nal_units_out += self.picture.nal_units;
        if au.keyframe {
            self.stats.keyframes_out += 1;
        }
        tracing::debug!(
            timestamp,
            nal_units = self.picture.nal_units,
            size = au.data.len(),
            keyframe = au.keyframe,
            marker,
            "access unit complete"
        );
        self.picture.clear();
        Some(au)
    }
}
