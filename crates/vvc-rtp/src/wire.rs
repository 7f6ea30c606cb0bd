//! # RFC 9328 Payload Structures
//!
//! Every RTP payload starts with a 2-byte PayloadHdr laid out like a NAL
//! unit header ([`NalHeader`]). Its type selects one of three structures.
//!
//! ## Fragmentation Unit (Type = 29)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    PayloadHdr (Type=29)       |S|E|P| FuType  |               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               |
//! |                         FU payload                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The fragmented unit's NAL header is not transmitted: the receiver rebuilds it from
//! the PayloadHdr's LayerId/TID and FuType.
//!
//! ## Aggregation Packet (Type = 28)
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    PayloadHdr (Type=28)       |         NALU 1 Size           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          NALU 1 HDR           |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+         NALU 1 Data           |
//! |                   . . .                                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  . . .        |         NALU 2 Size           |   NALU 2 HDR  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::nal::{NalHeader, NalUnit, NalUnitType, NAL_HEADER_LEN};

// ─── Constants ───────────────────────────────────────────────────────────────

pub const PAYLOAD_HDR_LEN: usize = NAL_HEADER_LEN;

/// PayloadHdr plus the 1-byte FU header.
pub const FU_HEADER_LEN: usize = PAYLOAD_HDR_LEN + 1;

/// Size prefix in front of every AP entry.
pub const AP_SIZE_LEN: usize = 2;

/// Largest NAL unit an AP entry's 16-bit size field can describe.
pub const AP_MAX_NAL_SIZE: usize = u16::MAX as usize;

// ─── FU Header ──────────────────────────────────────────────────────────────

/// The byte following an FU's PayloadHdr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader {
    pub start: bool,
    pub end: bool,
    /// Set on the last fragment of the last NAL unit of a picture.
    pub last_of_picture: bool,
    pub fu_type: NalUnitType,
}

impl FuHeader {
    pub fn encode(&self) -> u8 {
        ((self.start as u8) << 7)
            | ((self.end as u8) << 6)
            | ((self.last_of_picture as u8) << 5)
            | (self.fu_type.as_u8() & 0x1F)
    }

    pub fn decode(b: u8) -> Self {
        FuHeader {
            start: b & 0x80 != 0,
            end: b & 0x40 != 0,
            last_of_picture: b & 0x20 != 0,
            fu_type: NalUnitType::from_u8(b),
        }
    }
}

/// Write one FU: PayloadHdr derived from the fragmented unit's header, the FU
/// header and the fragment bytes.
pub fn encode_fu(buf: &mut impl BufMut, nal_header: &NalHeader, fu: FuHeader, fragment: &[u8]) {
    buf.put_slice(&nal_header.with_type(NalUnitType::Fu).encode());
    buf.put_u8(fu.encode());
    buf.put_slice(fragment);
}

/// Rebuild the NAL header of a fragmented unit from its FU's PayloadHdr.
///
/// The forbidden and reserved bits are not carried over.
pub fn fu_nal_header(payload_hdr: [u8; 2], fu: FuHeader) -> [u8; 2] {
    [
        payload_hdr[0] & 0x3F,
        (fu.fu_type.as_u8() << 3) | (payload_hdr[1] & 0x07),
    ]
}

/// Number of FUs needed to carry a NAL unit of `nal_size` bytes when each
/// fragment holds at most `capacity` bytes.
pub fn fu_count(nal_size: usize, capacity: usize) -> usize {
    nal_size.saturating_sub(NAL_HEADER_LEN).div_ceil(capacity.max(1))
}

// ─── Aggregation Packet ─────────────────────────────────────────────────────

/// Payload size of an AP with `members` entries totalling `nal_bytes`.
#[inline]
pub fn ap_payload_len(members: usize, nal_bytes: usize) -> usize {
    PAYLOAD_HDR_LEN + AP_SIZE_LEN * members + nal_bytes
}

/// PayloadHdr of an AP: F is the OR of all members, LayerId and TID the
/// minimum over all members.
pub fn ap_payload_header<'a>(members: impl IntoIterator<Item = &'a NalUnit>) -> NalHeader {
    let mut hdr = NalHeader {
        forbidden: false,
        reserved: false,
        layer_id: 0x3F,
        nal_type: NalUnitType::Ap,
        tid: 0x07,
    };
    for unit in members {
        hdr.forbidden |= unit.header.forbidden;
        hdr.layer_id = hdr.layer_id.min(unit.header.layer_id);
        hdr.tid = hdr.tid.min(unit.header.tid);
    }
    hdr
}

/// Serialize an AP payload from its members.
pub fn encode_ap(members: &[NalUnit]) -> Bytes {
    let nal_bytes: usize = members.iter().map(NalUnit::size).sum();
    let mut buf = BytesMut::with_capacity(ap_payload_len(members.len(), nal_bytes));
    buf.put_slice(&ap_payload_header(members).encode());
    for unit in members {
        buf.put_u16(unit.size() as u16);
        buf.put_slice(unit.data());
    }
    buf.freeze()
}

/// Iterator over the NAL units of an AP payload (PayloadHdr already removed).
///
/// A truncated entry yields one `MalformedNal` and ends the iteration.
pub struct ApEntries {
    buf: Bytes,
    failed: bool,
}

impl ApEntries {
    pub fn new(entries: Bytes) -> Self {
        ApEntries {
            buf: entries,
            failed: false,
        }
    }
}

impl Iterator for ApEntries {
    type Item = Result<Bytes, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }
        if self.buf.remaining() < AP_SIZE_LEN {
            self.failed = true;
            return Some(Err(Error::MalformedNal {
                len: self.buf.remaining(),
                needed: AP_SIZE_LEN,
            }));
        }
        let size = self.buf.get_u16() as usize;
        if self.buf.remaining() < size {
            self.failed = true;
            return Some(Err(Error::MalformedNal {
                len: self.buf.remaining(),
                needed: size,
            }));
        }
        Some(Ok(self.buf.split_to(size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nal::parse;

    fn unit(b0: u8, nal_type: u8, tid: u8, len: usize) -> NalUnit {
        let mut data = vec![0xAB; len];
        data[0] = b0;
        data[1] = (nal_type << 3) | tid;
        parse(Bytes::from(data)).unwrap()
    }

    #[test]
    fn fu_header_bits() {
        let fu = FuHeader {
            start: true,
            end: false,
            last_of_picture: false,
            fu_type: NalUnitType::IdrNLp,
        };
        assert_eq!(fu.encode(), 0x88);
        assert_eq!(FuHeader::decode(0x88), fu);

        let last = FuHeader::decode(0x60 | 1);
        assert!(!last.start);
        assert!(last.end);
        assert!(last.last_of_picture);
        assert_eq!(last.fu_type, NalUnitType::Stsa);
    }

    #[test]
    fn fu_layout() {
        let hdr = NalHeader::decode(0x02, (8 << 3) | 1);
        let fu = FuHeader {
            start: true,
            end: false,
            last_of_picture: false,
            fu_type: hdr.nal_type,
        };
        let mut buf = BytesMut::new();
        encode_fu(&mut buf, &hdr, fu, &[1, 2, 3]);
        assert_eq!(&buf[..], &[0x02, (29 << 3) | 1, 0x88, 1, 2, 3]);
    }

    #[test]
    fn fu_header_rebuilds_nal_header() {
        let rebuilt = fu_nal_header([0x85, (29 << 3) | 2], FuHeader::decode(0x80 | 7));
        assert_eq!(rebuilt, [0x05, (7 << 3) | 2]);
    }

    #[test]
    fn fu_count_rounds_up() {
        assert_eq!(fu_count(2 + 100, 100), 1);
        assert_eq!(fu_count(2 + 101, 100), 2);
        assert_eq!(fu_count(2 + 3000, 1385), 3);
    }

    #[test]
    fn ap_header_uses_minimum_layer_and_tid() {
        let members = [unit(0x04, 14, 3, 4), unit(0x82, 15, 1, 4), unit(0x03, 16, 2, 4)];
        let hdr = ap_payload_header(&members);
        assert!(hdr.forbidden);
        assert_eq!(hdr.layer_id, 2);
        assert_eq!(hdr.tid, 1);
        assert_eq!(hdr.nal_type, NalUnitType::Ap);
    }

    #[test]
    fn ap_encode_then_iterate() {
        let members = vec![unit(0, 14, 1, 20), unit(0, 15, 1, 15), unit(0, 16, 1, 10)];
        let payload = encode_ap(&members);
        assert_eq!(payload.len(), ap_payload_len(3, 45));
        assert_eq!(&payload[2..4], &[0x00, 20]);

        let entries: Vec<Bytes> = ApEntries::new(payload.slice(PAYLOAD_HDR_LEN..))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        for (entry, member) in entries.iter().zip(&members) {
            assert_eq!(entry, member.data());
        }
    }

    #[test]
    fn ap_truncated_entry() {
        let mut entries = ApEntries::new(Bytes::from_static(&[0x00, 0x02, 0x00, 0x79, 0x00, 0x05, 0x00]));
        assert_eq!(entries.next(), Some(Ok(Bytes::from_static(&[0x00, 0x79]))));
        assert_eq!(
            entries.next(),
            Some(Err(Error::MalformedNal { len: 1, needed: 5 }))
        );
        assert_eq!(entries.next(), None);
    }

    #[test]
    fn ap_dangling_size_byte() {
        let mut entries = ApEntries::new(Bytes::from_static(&[0x00]));
        assert_eq!(
            entries.next(),
            Some(Err(Error::MalformedNal { len: 1, needed: 2 }))
        );
        assert_eq!(entries.next(), None);
    }
}
