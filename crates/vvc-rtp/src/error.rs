//! Error taxonomy for the payloader and depayloader.
//!
//! Only [`Error::UnsupportedFeature`] is ever returned from a `push`. The
//! other kinds describe data loss that the state machines recover from
//! locally: they are logged, counted in the stats and the offending NAL or
//! fragment is dropped.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("malformed NAL unit: {len} bytes, need at least {needed}")]
    MalformedNal { len: usize, needed: usize },

    #[error("fragment sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u16, got: u16 },

    #[error("continuation fragment (seq {seq}) without a start fragment")]
    MissingFragmentStart { seq: u16 },

    #[error("NAL unit type {nal_type} not supported in this build")]
    UnsupportedFeature { nal_type: u8 },

    #[error("empty packet")]
    EmptyPacket,
}

impl Error {
    /// Whether the error ends the stream rather than a single NAL unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::UnsupportedFeature { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(String),

    #[error("config-interval {0} out of range (-1..=3600)")]
    ConfigInterval(i32),

    #[error("mtu {mtu} too small (minimum {min})")]
    Mtu { mtu: usize, min: usize },

    #[error("unknown aggregate mode `{0}`")]
    AggregateMode(String),

    #[error("unknown alignment `{0}`")]
    Alignment(String),

    #[error("payload type {0} out of range (0..=127)")]
    PayloadType(u8),

    #[error("clock rate must be non-zero")]
    ClockRate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unsupported_feature_is_fatal() {
        assert!(Error::UnsupportedFeature { nal_type: 28 }.is_fatal());
        assert!(!Error::EmptyPacket.is_fatal());
        assert!(!Error::SequenceGap {
            expected: 6,
            got: 7
        }
        .is_fatal());
        assert!(!Error::MalformedNal { len: 1, needed: 2 }.is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::SequenceGap {
            expected: 6,
            got: 7,
        };
        assert_eq!(e.to_string(), "fragment sequence gap: expected 6, got 7");
        let e = ConfigError::Mtu { mtu: 8, min: 16 };
        assert_eq!(e.to_string(), "mtu 8 too small (minimum 16)");
    }
}
