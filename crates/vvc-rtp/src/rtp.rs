//! # RTP Fixed Header
//!
//! RFC 3550 §5.1, version 2.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Encoding never emits CSRCs, extensions or padding; decoding skips them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

pub const RTP_VERSION: u8 = 2;

/// Size of the fixed header.
pub const RTP_HEADER_LEN: usize = 12;

// ─── Packet ─────────────────────────────────────────────────────────────────

/// One RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Encoded size, header included.
    #[inline]
    pub fn len(&self) -> usize {
        RTP_HEADER_LEN + self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
    }

    /// Decode a whole datagram. Returns `None` for anything that is not a
    /// well-formed version 2 packet.
    pub fn decode(mut buf: Bytes) -> Option<Self> {
        if buf.remaining() < RTP_HEADER_LEN {
            return None;
        }
        let b0 = buf.get_u8();
        if b0 >> 6 != RTP_VERSION {
            return None;
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = buf.get_u8();
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            return None;
        }
        buf.advance(csrc_count * 4);

        if extension {
            if buf.remaining() < 4 {
                return None;
            }
            let _profile = buf.get_u16();
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return None;
            }
            buf.advance(words * 4);
        }

        if padding {
            let pad = *buf.last()? as usize;
            if pad == 0 || pad > buf.len() {
                return None;
            }
            buf.truncate(buf.len() - pad);
        }

        Some(RtpPacket {
            payload_type: b1 & 0x7F,
            marker: b1 & 0x80 != 0,
            sequence,
            timestamp,
            ssrc,
            payload: buf,
        })
    }
}

// ─── SequenceGenerator ──────────────────────────────────────────────────────

/// Monotonic 16-bit RTP sequence counter, wrapping at 2^16.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    next: u16,
}

impl SequenceGenerator {
    pub fn new(offset: u16) -> Self {
        SequenceGenerator { next: offset }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    pub fn current(&self) -> u16 {
        self.next
    }
}

// ─── RtpClock ───────────────────────────────────────────────────────────────

/// Maps presentation timestamps onto the 32-bit RTP clock.
#[derive(Debug, Clone)]
pub struct RtpClock {
    clock_rate: u32,
    offset: u32,
    last: u32,
}

impl RtpClock {
    pub fn new(clock_rate: u32, offset: u32) -> Self {
        RtpClock {
            clock_rate,
            offset,
            last: offset,
        }
    }

    /// RTP timestamp for `pts`. Without a PTS the last mapped value is reused.
    pub fn timestamp(&mut self, pts: Option<Duration>) -> u32 {
        if let Some(pts) = pts {
            let ticks = pts.as_nanos() * self.clock_rate as u128 / 1_000_000_000;
            self.last = self.offset.wrapping_add(ticks as u32);
        }
        self.last
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }
}

/// Turns wrapping RTP timestamps back into a running time, counted from the
/// first timestamp seen.
#[derive(Debug, Clone)]
pub struct TimestampUnwrapper {
    clock_rate: u32,
    last: Option<u32>,
    ticks: i64,
}

impl TimestampUnwrapper {
    pub fn new(clock_rate: u32) -> Self {
        TimestampUnwrapper {
            clock_rate,
            last: None,
            ticks: 0,
        }
    }

    /// Running time of `timestamp`. Steps backwards clamp at zero.
    pub fn running_time(&mut self, timestamp: u32) -> Duration {
        if let Some(last) = self.last {
            self.ticks += timestamp.wrapping_sub(last) as i32 as i64;
        }
        self.last = Some(timestamp);
        let ticks = self.ticks.max(0) as u128;
        Duration::from_nanos((ticks * 1_000_000_000 / self.clock_rate.max(1) as u128) as u64)
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.ticks = 0;
    }
}
