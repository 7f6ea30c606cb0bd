//! # Payloader / Depayloader Statistics
//!
//! Plain counters, serializable to JSON for the CLI and host applications.

use serde::Serialize;

// ─── Payloader Stats ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayloaderStats {
    /// NAL units accepted from input buffers.
    pub nal_units_in: u64,
    /// RTP packets produced, all kinds.
    pub packets_out: u64,
    /// RTP bytes produced, headers included.
    pub bytes_out: u64,
    pub single_unit_packets: u64,
    pub fragmentation_units: u64,
    pub aggregation_packets: u64,
    /// Parameter-set units inserted from the cache.
    pub parameter_sets_inserted: u64,
    /// Input NAL units dropped as malformed.
    pub malformed_nal_units: u64,
    /// Units discarded by flush or reset.
    pub discarded_nal_units: u64,
}

impl PayloaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean RTP packet size in bytes.
    pub fn mean_packet_size(&self) -> f64 {
        if self.packets_out == 0 {
            0.0
        } else {
            self.bytes_out as f64 / self.packets_out as f64
        }
    }
}

// ─── Depayloader Stats ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DepayloaderStats {
    pub packets_in: u64,
    pub access_units_out: u64,
    pub nal_units_out: u64,
    pub keyframes_out: u64,
    pub empty_packets: u64,
    pub malformed_nal_units: u64,
    pub sequence_gaps: u64,
    pub missing_fragment_starts: u64,
    /// Fragments dropped by gaps, missing starts or flushes.
    pub fragments_discarded: u64,
    /// Incomplete fragmented units delivered as-is.
    pub forced_fragment_flushes: u64,
}

impl DepayloaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets that carried data we could not use, as a share of all packets.
    pub fn loss_ratio(&self) -> f64 {
        if self.packets_in == 0 {
            0.0
        } else {
            let bad = self.empty_packets
                + self.malformed_nal_units
                + self.sequence_gaps
                + self.missing_fragment_starts;
            bad as f64 / self.packets_in as f64
        }
    }
}
