//! # vvc-rtp
//!
//! RTP payload format for H.266 / VVC video (RFC 9328).
//!
//! Two framework-independent state machines: a [`payloader::Payloader`] that
//! turns an Annex-B elementary stream into RTP packets (Single Unit,
//! Aggregation Packets, Fragmentation Units) and a
//! [`depayloader::Depayloader`] that reassembles access units from them.
//!
//! ## Crate structure
//!
//! - [`nal`]: NAL unit parsing, classification, Annex-B scanning
//! - [`boundary`]: Access-unit boundary detection
//! - [`ps_cache`]: Parameter-set cache and in-band insertion policy
//! - [`wire`]: RFC 9328 PayloadHdr, FU header, AP entries
//! - [`rtp`]: RTP fixed header, sequence numbers, RTP clock
//! - [`payloader`]: Payloader state machine
//! - [`depayloader`]: Depayloader state machine
//! - [`config`]: Configuration and TOML loading
//! - [`stats`]: Payloader / depayloader counters
//! - [`error`]: Error types

pub mod boundary;
pub mod config;
pub mod depayloader;
pub mod error;
pub mod nal;
pub mod payloader;
pub mod ps_cache;
pub mod rtp;
pub mod stats;
pub mod wire;

pub use error::{ConfigError, Error};

/// Stream control events shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Drop everything in flight.
    Flush,
    /// Push out whatever is still buffered.
    EndOfStream,
    /// A new stream begins; cached parameter sets no longer apply.
    StreamStart,
    /// Return to the initial state.
    Reset,
}
