//! # Parameter-Set Cache
//!
//! Remembers the latest VPS/SPS/PPS/APS per (type, id) and decides when the
//! payloader re-sends them in band.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::config::ConfigInterval;
use crate::nal::{NalUnit, NalUnitType};

/// Cache key. Ordering by type first gives VPS, SPS, PPS, APS insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterSetKey {
    pub nal_type: NalUnitType,
    pub id: u8,
}

#[derive(Debug, Clone)]
pub struct ParameterSetCache {
    interval: ConfigInterval,
    sets: BTreeMap<ParameterSetKey, NalUnit>,
    /// PTS at which the cached sets last went out, in band or inserted.
    last_sent: Option<Duration>,
}

impl ParameterSetCache {
    pub fn new(interval: ConfigInterval) -> Self {
        ParameterSetCache {
            interval,
            sets: BTreeMap::new(),
            last_sent: None,
        }
    }

    pub fn interval(&self) -> ConfigInterval {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn last_sent(&self) -> Option<Duration> {
        self.last_sent
    }

    /// Record a parameter set seen in the stream. Other units are ignored.
    pub fn observe(&mut self, nal: &NalUnit) {
        let Some(id) = nal.ps_id else {
            return;
        };
        if !nal.nal_type().is_parameter_set() {
            return;
        }
        let key = ParameterSetKey {
            nal_type: nal.nal_type(),
            id,
        };
        tracing::debug!(nal_type = %key.nal_type, id, "caching parameter set");
        let mut cached = nal.clone();
        cached.au_start = false;
        cached.au_end = false;
        cached.marker = false;
        self.sets.insert(key, cached);
        self.last_sent = nal.pts;
    }

    pub fn clear(&mut self) {
        self.sets.clear();
        self.last_sent = None;
    }

    /// Whether the cached sets are due in front of `nal`.
    pub fn due_before(&self, nal: &NalUnit) -> bool {
        let ty = nal.nal_type();
        if self.sets.is_empty() || !ty.is_vcl() || ty.is_reserved() {
            return false;
        }
        match self.interval {
            ConfigInterval::Disabled => false,
            ConfigInterval::OnKeyframe => {
                ty.is_idr() && (self.last_sent.is_none() || self.last_sent != nal.pts)
            }
            ConfigInterval::Every(period) => match (self.last_sent, nal.pts) {
                (Some(last), Some(pts)) => last + period <= pts,
                _ => false,
            },
        }
    }

    /// Insert copies of the cached sets in front of the first unit of
    /// `pending[checked..]` that is due for them. Returns the number of units
    /// inserted.
    ///
    /// Units before `checked` were looked at by an earlier call and are never
    /// insertion points again.
    pub fn insert_into(&mut self, pending: &mut VecDeque<NalUnit>, checked: usize) -> usize {
        let Some(at) = pending
            .iter()
            .skip(checked)
            .position(|nal| self.due_before(nal))
            .map(|i| i + checked)
        else {
            return 0;
        };
        let (pts, dts) = pending[at].timestamps();

        for (i, nal) in self.sets.values().enumerate() {
            pending.insert(at + i, nal.clone().with_timestamps(pts, dts));
        }
        self.last_sent = pts;

        tracing::debug!(
            count = self.sets.len(),
            before = %pending[at + self.sets.len()].nal_type(),
            "inserted parameter sets"
        );
        self.sets.len()
    }
}
