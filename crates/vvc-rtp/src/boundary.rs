//! # Access-Unit Boundary Detection
//!
//! Marks `au_start` / `au_end` on the payloader's pending NAL units.
//!
//! A NAL unit opens a new AU when it is an access unit delimiter or when its
//! (PTS, DTS) pair differs from the preceding unit's; the preceding unit then
//! closes its AU. The last pending unit is closed early when the stream is
//! AU-aligned or its source buffer carried the marker flag, so it does not
//! have to wait for the next buffer.
//!
//! The depayloader does not use this module: there an AU is complete only
//! when the RTP marker bit says so, or at end of stream.

use std::collections::VecDeque;

use crate::config::Alignment;
use crate::nal::{NalUnit, NalUnitType};

/// Boundary detector for one payloader.
#[derive(Debug, Clone, Copy)]
pub struct AuBoundaryDetector {
    alignment: Alignment,
}

impl AuBoundaryDetector {
    pub fn new(alignment: Alignment) -> Self {
        AuBoundaryDetector { alignment }
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Whether `nal` opens an AU, given the unit emitted right before it.
    pub fn starts_au(previous: Option<&NalUnit>, nal: &NalUnit) -> bool {
        if nal.nal_type() == NalUnitType::Aud {
            return true;
        }
        match previous {
            Some(prev) => prev.timestamps() != nal.timestamps(),
            None => true,
        }
    }

    /// Mark boundaries across `pending`.
    ///
    /// `previous` is the unit preceding the head of `pending` that can still
    /// be modified (the tail of the aggregation buffer), if any.
    pub fn mark(&self, mut previous: Option<&mut NalUnit>, pending: &mut VecDeque<NalUnit>) {
        for i in 0..pending.len() {
            let au_start = match i {
                0 => Self::starts_au(previous.as_deref(), &pending[0]),
                _ => Self::starts_au(Some(&pending[i - 1]), &pending[i]),
            };
            pending[i].au_start = au_start;
            if !au_start {
                continue;
            }
            if i > 0 {
                pending[i - 1].au_end = true;
            } else if let Some(prev) = previous.as_deref_mut() {
                if !prev.au_end {
                    tracing::debug!("AU start found, previous AU finished");
                }
                prev.au_end = true;
            }
        }

        if let Some(last) = pending.back_mut() {
            last.au_end |= self.alignment == Alignment::Au || last.marker;
        }
    }
}
