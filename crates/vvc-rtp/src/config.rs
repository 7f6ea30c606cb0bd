//! # Configuration
//!
//! Payloader and depayloader settings. A TOML file deserializes into
//! [`ConfigInput`], where every field is optional; [`ConfigInput::resolve`]
//! fills in defaults and validates the result into a [`Config`].
//!
//! ```toml
//! [payloader]
//! mtu = 1200
//! config-interval = -1        # 0 off, -1 before every IDR, N seconds
//! aggregate-mode = "zero-latency"
//! alignment = "au"
//!
//! [depayloader]
//! clock-rate = 90000
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::rtp::RTP_HEADER_LEN;
use crate::wire::FU_HEADER_LEN;

/// Default RTP packet size, header included.
pub const DEFAULT_MTU: usize = 1400;

/// Smallest MTU that still leaves one byte of FU payload.
pub const MIN_MTU: usize = RTP_HEADER_LEN + FU_HEADER_LEN + 1;

/// Video clock rate mandated by RFC 9328.
pub const DEFAULT_CLOCK_RATE: u32 = 90_000;

pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Longest accepted `config-interval`, in seconds.
pub const MAX_CONFIG_INTERVAL: i32 = 3600;

// ─── Options ────────────────────────────────────────────────────────────────

/// Parameter-set (re)insertion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigInterval {
    #[default]
    Disabled,
    /// Before every IDR access unit.
    OnKeyframe,
    /// At most once per interval, before the next eligible VCL NAL unit.
    Every(Duration),
}

impl ConfigInterval {
    /// Decode the integer form: `0` disabled, `-1` every IDR, `N` seconds.
    pub fn from_secs(secs: i32) -> Result<Self, ConfigError> {
        match secs {
            0 => Ok(ConfigInterval::Disabled),
            -1 => Ok(ConfigInterval::OnKeyframe),
            1..=MAX_CONFIG_INTERVAL => Ok(ConfigInterval::Every(Duration::from_secs(secs as u64))),
            _ => Err(ConfigError::ConfigInterval(secs)),
        }
    }

    pub fn as_secs(&self) -> i32 {
        match self {
            ConfigInterval::Disabled => 0,
            ConfigInterval::OnKeyframe => -1,
            ConfigInterval::Every(d) => d.as_secs() as i32,
        }
    }
}

/// Which NAL units the payloader may bundle into Aggregation Packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateMode {
    /// Never aggregate.
    #[default]
    None,
    /// Aggregate non-VCL units only, so slices never wait for the next unit.
    ZeroLatency,
    /// Aggregate everything within one AU (adds one frame of latency).
    Max,
}

impl FromStr for AggregateMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AggregateMode::None),
            "zero-latency" => Ok(AggregateMode::ZeroLatency),
            "max" => Ok(AggregateMode::Max),
            other => Err(ConfigError::AggregateMode(other.to_string())),
        }
    }
}

impl fmt::Display for AggregateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateMode::None => "none",
            AggregateMode::ZeroLatency => "zero-latency",
            AggregateMode::Max => "max",
        })
    }
}

/// Alignment of the buffers fed to the payloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Each buffer ends with a complete AU.
    Au,
    /// Buffers may end anywhere between NAL units.
    #[default]
    Nal,
}

impl FromStr for Alignment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "au" => Ok(Alignment::Au),
            "nal" => Ok(Alignment::Nal),
            other => Err(ConfigError::Alignment(other.to_string())),
        }
    }
}

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfigInput {
    pub payloader: PayloaderConfigInput,
    pub depayloader: DepayloaderConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PayloaderConfigInput {
    pub mtu: Option<usize>,
    pub config_interval: Option<i32>,
    pub aggregate_mode: Option<AggregateMode>,
    pub alignment: Option<Alignment>,
    pub payload_type: Option<u8>,
    pub ssrc: Option<u32>,
    pub seqnum_offset: Option<u16>,
    pub timestamp_offset: Option<u32>,
    pub clock_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DepayloaderConfigInput {
    pub clock_rate: Option<u32>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

/// Payloader configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloaderConfig {
    /// Maximum RTP packet size, RTP header included.
    pub mtu: usize,
    pub config_interval: ConfigInterval,
    pub aggregate_mode: AggregateMode,
    pub alignment: Alignment,
    pub payload_type: u8,
    pub ssrc: u32,
    /// First sequence number.
    pub seqnum_offset: u16,
    /// RTP timestamp of PTS zero.
    pub timestamp_offset: u32,
    pub clock_rate: u32,
}

impl Default for PayloaderConfig {
    fn default() -> Self {
        PayloaderConfig {
            mtu: DEFAULT_MTU,
            config_interval: ConfigInterval::default(),
            aggregate_mode: AggregateMode::default(),
            alignment: Alignment::default(),
            payload_type: DEFAULT_PAYLOAD_TYPE,
            ssrc: 0,
            seqnum_offset: 0,
            timestamp_offset: 0,
            clock_rate: DEFAULT_CLOCK_RATE,
        }
    }
}

impl PayloaderConfig {
    /// Check the invariants `resolve` enforces on hand-built configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU {
            return Err(ConfigError::Mtu {
                mtu: self.mtu,
                min: MIN_MTU,
            });
        }
        if self.payload_type > 127 {
            return Err(ConfigError::PayloadType(self.payload_type));
        }
        if self.clock_rate == 0 {
            return Err(ConfigError::ClockRate);
        }
        if let ConfigInterval::Every(d) = self.config_interval {
            if d.is_zero() || d.as_secs() > MAX_CONFIG_INTERVAL as u64 {
                return Err(ConfigError::ConfigInterval(d.as_secs() as i32));
            }
        }
        Ok(())
    }
}

/// Depayloader configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepayloaderConfig {
    pub clock_rate: u32,
}

impl Default for DepayloaderConfig {
    fn default() -> Self {
        DepayloaderConfig {
            clock_rate: DEFAULT_CLOCK_RATE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub payloader: PayloaderConfig,
    pub depayloader: DepayloaderConfig,
}

impl ConfigInput {
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let defaults = PayloaderConfig::default();
        let p = self.payloader;
        let payloader = PayloaderConfig {
            mtu: p.mtu.unwrap_or(defaults.mtu),
            config_interval: match p.config_interval {
                Some(secs) => ConfigInterval::from_secs(secs)?,
                None => defaults.config_interval,
            },
            aggregate_mode: p.aggregate_mode.unwrap_or(defaults.aggregate_mode),
            alignment: p.alignment.unwrap_or(defaults.alignment),
            payload_type: p.payload_type.unwrap_or(defaults.payload_type),
            ssrc: p.ssrc.unwrap_or(defaults.ssrc),
            seqnum_offset: p.seqnum_offset.unwrap_or(defaults.seqnum_offset),
            timestamp_offset: p.timestamp_offset.unwrap_or(defaults.timestamp_offset),
            clock_rate: p.clock_rate.unwrap_or(defaults.clock_rate),
        };
        payloader.validate()?;

        let depayloader = DepayloaderConfig {
            clock_rate: self
                .depayloader
                .clock_rate
                .unwrap_or(DEFAULT_CLOCK_RATE),
        };
        if depayloader.clock_rate == 0 {
            return Err(ConfigError::ClockRate);
        }

        Ok(Config {
            payloader,
            depayloader,
        })
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Config::default());
        }
        let parsed: ConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Toml(e.to_string()))?;
        parsed.resolve()
    }
}
