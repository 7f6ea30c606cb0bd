//! # NAL Unit Parser
//!
//! Decodes and classifies H.266 (VVC) NAL units.
//!
//! The NAL unit header is 2 bytes:
//!
//! ```text
//! +---------------+---------------+
//! |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|Z| LayerID   |  Type   | TID |
//! +---------------+---------------+
//! ```
//!
//! RTP payload headers (RFC 9328 §4.3) reuse the same layout, with types 28
//! (AP) and 29 (FU) taken from the unspecified range.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

use crate::error::Error;

/// Size of the NAL unit header.
pub const NAL_HEADER_LEN: usize = 2;

/// Start code emitted in front of every NAL unit of an Annex-B stream.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

// ─── NAL Unit Type ──────────────────────────────────────────────────────────

/// `nal_unit_type` (H.266 Table 5), extended with the RTP payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NalUnitType {
    Trail = 0,
    Stsa = 1,
    Radl = 2,
    Rasl = 3,
    RsvVcl4 = 4,
    RsvVcl5 = 5,
    RsvVcl6 = 6,
    IdrWRadl = 7,
    IdrNLp = 8,
    Cra = 9,
    Gdr = 10,
    RsvIrap11 = 11,
    Opi = 12,
    Dci = 13,
    Vps = 14,
    Sps = 15,
    Pps = 16,
    PrefixAps = 17,
    SuffixAps = 18,
    Ph = 19,
    Aud = 20,
    Eos = 21,
    Eob = 22,
    PrefixSei = 23,
    SuffixSei = 24,
    Fd = 25,
    RsvNvcl26 = 26,
    RsvNvcl27 = 27,
    /// Aggregation Packet (RFC 9328 §4.3.2).
    Ap = 28,
    /// Fragmentation Unit (RFC 9328 §4.3.3).
    Fu = 29,
    Unspec30 = 30,
    Unspec31 = 31,
}

impl NalUnitType {
    /// Map the low 5 bits of `v` to a type. Total over `u8`.
    pub fn from_u8(v: u8) -> Self {
        use NalUnitType::*;
        match v & 0x1F {
            0 => Trail,
            1 => Stsa,
            2 => Radl,
            3 => Rasl,
            4 => RsvVcl4,
            5 => RsvVcl5,
            6 => RsvVcl6,
            7 => IdrWRadl,
            8 => IdrNLp,
            9 => Cra,
            10 => Gdr,
            11 => RsvIrap11,
            12 => Opi,
            13 => Dci,
            14 => Vps,
            15 => Sps,
            16 => Pps,
            17 => PrefixAps,
            18 => SuffixAps,
            19 => Ph,
            20 => Aud,
            21 => Eos,
            22 => Eob,
            23 => PrefixSei,
            24 => SuffixSei,
            25 => Fd,
            26 => RsvNvcl26,
            27 => RsvNvcl27,
            28 => Ap,
            29 => Fu,
            30 => Unspec30,
            _ => Unspec31,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Slice-carrying (VCL) types, reserved VCL types included.
    #[inline]
    pub fn is_vcl(self) -> bool {
        self.as_u8() <= NalUnitType::RsvIrap11.as_u8()
    }

    /// VPS, SPS, PPS and both APS flavours.
    #[inline]
    pub fn is_parameter_set(self) -> bool {
        (NalUnitType::Vps.as_u8()..=NalUnitType::SuffixAps.as_u8()).contains(&self.as_u8())
    }

    /// VPS, SPS and PPS: the sets a decoder needs before it can start.
    #[inline]
    pub fn is_sequence_config(self) -> bool {
        matches!(
            self,
            NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps
        )
    }

    #[inline]
    pub fn is_idr(self) -> bool {
        matches!(self, NalUnitType::IdrWRadl | NalUnitType::IdrNLp)
    }

    /// Types reserved by H.266 for future use.
    #[inline]
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            NalUnitType::RsvVcl4
                | NalUnitType::RsvVcl5
                | NalUnitType::RsvVcl6
                | NalUnitType::RsvIrap11
                | NalUnitType::RsvNvcl26
                | NalUnitType::RsvNvcl27
        )
    }

    /// Types H.266 leaves unspecified (28..=31), the RTP packet types included.
    #[inline]
    pub fn is_unspecified(self) -> bool {
        self.as_u8() >= NalUnitType::Ap.as_u8()
    }

    /// Types that open a new picture unit when they follow a VCL unit
    /// (H.266 §7.4.2.4.3).
    pub fn opens_picture_unit(self) -> bool {
        use NalUnitType::*;
        matches!(
            self,
            Aud | Dci | Opi | Vps | Sps | Pps | PrefixAps | Ph | PrefixSei | RsvNvcl26 | Ap | Fu
        )
    }

    /// Number of bytes `parse` needs to read this type's parameter-set id.
    fn min_len(self) -> usize {
        match self {
            NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps => NAL_HEADER_LEN + 1,
            NalUnitType::PrefixAps | NalUnitType::SuffixAps => NAL_HEADER_LEN + 2,
            _ => NAL_HEADER_LEN,
        }
    }
}

impl fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u8())
    }
}

// ─── NAL Header ─────────────────────────────────────────────────────────────

/// Decoded 2-byte NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// forbidden_zero_bit.
    pub forbidden: bool,
    /// nuh_reserved_zero_bit.
    pub reserved: bool,
    /// nuh_layer_id (6 bits).
    pub layer_id: u8,
    pub nal_type: NalUnitType,
    /// nuh_temporal_id_plus1 (3 bits).
    pub tid: u8,
}

impl NalHeader {
    pub fn decode(b0: u8, b1: u8) -> Self {
        NalHeader {
            forbidden: b0 & 0x80 != 0,
            reserved: b0 & 0x40 != 0,
            layer_id: b0 & 0x3F,
            nal_type: NalUnitType::from_u8(b1 >> 3),
            tid: b1 & 0x07,
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        [
            ((self.forbidden as u8) << 7) | ((self.reserved as u8) << 6) | (self.layer_id & 0x3F),
            (self.nal_type.as_u8() << 3) | (self.tid & 0x07),
        ]
    }

    /// The same header with another type, as used for AP/FU payload headers.
    pub fn with_type(mut self, nal_type: NalUnitType) -> Self {
        self.nal_type = nal_type;
        self
    }
}

// ─── NAL Unit ───────────────────────────────────────────────────────────────

/// One NAL unit (header + RBSP, no start code) and its payloader bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    data: Bytes,
    pub header: NalHeader,
    /// Parameter-set id, only for VPS/SPS/PPS/APS.
    pub ps_id: Option<u8>,
    pub au_start: bool,
    pub au_end: bool,
    pub pts: Option<Duration>,
    pub dts: Option<Duration>,
    /// Marker flag of the buffer this NAL unit was the last of.
    pub marker: bool,
}

impl NalUnit {
    /// Whole NAL unit, header included.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The 2-byte header region.
    #[inline]
    pub fn header_bytes(&self) -> &[u8] {
        &self.data[..NAL_HEADER_LEN]
    }

    /// Everything after the header.
    #[inline]
    pub fn rbsp(&self) -> Bytes {
        self.data.slice(NAL_HEADER_LEN..)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn nal_type(&self) -> NalUnitType {
        self.header.nal_type
    }

    #[inline]
    pub fn timestamps(&self) -> (Option<Duration>, Option<Duration>) {
        (self.pts, self.dts)
    }

    pub fn with_timestamps(mut self, pts: Option<Duration>, dts: Option<Duration>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }
}

/// Parse one NAL unit (without start code).
///
/// Fails when the buffer cannot hold the header, or the leading RBSP bytes
/// carrying the parameter-set id of VPS/SPS/PPS/APS units.
///
/// ```text
/// |            NALU HDR           |  first RBSP bytes
/// |-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-|-+-+-+-+-+-+-+-:-+-+-+-+-+-+-+-:
/// |F|Z| LayerID   |   Type  | TID |
///                        VPS/SPS: |X X X X . . . .:. . . . . . . .:
///                            PPS: |X X X X X X . .:. . . . . . . .:
///                      PAPS/SAPS: |. . . . . . X X:X X . . . . . .:
/// ```
pub fn parse(data: Bytes) -> Result<NalUnit, Error> {
    if data.len() < NAL_HEADER_LEN {
        return Err(Error::MalformedNal {
            len: data.len(),
            needed: NAL_HEADER_LEN,
        });
    }

    let header = NalHeader::decode(data[0], data[1]);
    let needed = header.nal_type.min_len();
    if data.len() < needed {
        return Err(Error::MalformedNal {
            len: data.len(),
            needed,
        });
    }

    let ps_id = match header.nal_type {
        NalUnitType::Vps | NalUnitType::Sps => Some(data[2] >> 4),
        NalUnitType::Pps => Some(data[2] >> 2),
        NalUnitType::PrefixAps | NalUnitType::SuffixAps => {
            Some(((data[2] & 0x03) << 2) | ((data[3] & 0xC0) >> 6))
        }
        _ => None,
    };

    Ok(NalUnit {
        data,
        header,
        ps_id,
        au_start: false,
        au_end: false,
        pts: None,
        dts: None,
        marker: false,
    })
}

// ─── Annex B ────────────────────────────────────────────────────────────────

/// Iterator over the NAL units of an Annex-B buffer.
///
/// Start codes are `00 00 01` or `00 00 00 01`. Bytes before the first start
/// code are skipped and trailing zero bytes are stripped from every unit.
/// Yielded slices share the input allocation.
pub struct AnnexBReader {
    data: Bytes,
    pos: usize,
}

impl AnnexBReader {
    pub fn new(data: Bytes) -> Self {
        let pos = find_start_code(&data, 0).map_or(data.len(), |(_, payload)| payload);
        AnnexBReader { data, pos }
    }
}

impl Iterator for AnnexBReader {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (end, next) = match find_start_code(&self.data, start) {
                Some((sc, payload)) => (sc, payload),
                None => (self.data.len(), self.data.len()),
            };
            self.pos = next;

            let mut end = end;
            while end > start && self.data[end - 1] == 0x00 {
                end -= 1;
            }
            if end > start {
                return Some(self.data.slice(start..end));
            }
        }
        None
    }
}

/// Split an Annex-B stream into access units.
///
/// A unit whose type [opens a picture unit](NalUnitType::opens_picture_unit)
/// starts a new AU once the current one holds a VCL unit. Each AU is returned
/// as Annex-B bytes with 4-byte start codes.
///
/// Pictures made of several slices without a picture header NAL unit between
/// them are not split, since that needs slice header parsing.
pub fn split_access_units(data: Bytes) -> Vec<Bytes> {
    let mut aus = Vec::new();
    let mut current = BytesMut::new();
    let mut has_vcl = false;

    for unit in AnnexBReader::new(data) {
        let nal_type = match unit.get(1) {
            Some(b) => NalUnitType::from_u8(b >> 3),
            None => continue,
        };
        if has_vcl && nal_type.opens_picture_unit() {
            aus.push(current.split().freeze());
            has_vcl = false;
        }
        has_vcl |= nal_type.is_vcl();
        current.put_slice(&START_CODE);
        current.put_slice(&unit);
    }
    if !current.is_empty() {
        aus.push(current.freeze());
    }
    aus
}

/// Find the next 3-byte start code at or after `from`.
///
/// Returns `(start code offset, payload offset)`. A fourth leading zero is
/// left to the previous unit, whose trailing zeros are stripped anyway.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 2 < data.len() {
        if data[i + 2] > 1 {
            i += 3;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some((i, i + 3));
        } else {
            i += 1;
        }
    }
    None
}
