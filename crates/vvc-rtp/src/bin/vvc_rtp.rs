//! # vvc-rtp
//!
//! Packetise an H.266 Annex-B file into RTP, or reassemble one.
//!
//! RTP packets are stored RFC 4571 style: every packet behind a 16-bit
//! big-endian length.
//!
//! ## Usage
//!
//! ```bash
//! # Annex-B → RTP, 30 fps, aggregating parameter sets
//! vvc-rtp pay input.266 output.rtp --fps 30 --aggregate-mode zero-latency
//!
//! # Re-send VPS/SPS/PPS before every IDR, smaller packets
//! vvc-rtp pay input.266 output.rtp --config-interval -1 --mtu 1200
//!
//! # RTP → Annex-B
//! vvc-rtp depay output.rtp roundtrip.266
//!
//! # Settings from a file, flags still win
//! vvc-rtp --config vvc-rtp.toml pay input.266 output.rtp
//! ```

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::{Buf, Bytes};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vvc_rtp::config::{AggregateMode, Alignment, Config, ConfigInterval};
use vvc_rtp::depayloader::Depayloader;
use vvc_rtp::nal::split_access_units;
use vvc_rtp::payloader::{Payloader, VideoBuffer};
use vvc_rtp::rtp::RtpPacket;
use vvc_rtp::ControlEvent;

/// RFC 9328 RTP payloader / depayloader for H.266 streams.
#[derive(Parser, Debug)]
#[command(name = "vvc-rtp", about = "RTP payloader and depayloader for H.266 / VVC")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Annex-B elementary stream → length-prefixed RTP packets.
    Pay {
        input: PathBuf,
        output: PathBuf,

        /// Frame rate used to timestamp access units.
        #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u32).range(1..))]
        fps: u32,

        /// Maximum RTP packet size in bytes.
        #[arg(long)]
        mtu: Option<usize>,

        /// Parameter-set insertion: 0 off, -1 before every IDR, N seconds.
        #[arg(long, allow_hyphen_values = true)]
        config_interval: Option<i32>,

        /// none, zero-latency or max.
        #[arg(long)]
        aggregate_mode: Option<AggregateMode>,

        /// RTP payload type.
        #[arg(long)]
        pt: Option<u8>,

        /// RTP SSRC.
        #[arg(long)]
        ssrc: Option<u32>,
    },
    /// Length-prefixed RTP packets → Annex-B elementary stream.
    Depay { input: PathBuf, output: PathBuf },
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Config::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Pay {
            input,
            output,
            fps,
            mtu,
            config_interval,
            aggregate_mode,
            pt,
            ssrc,
        } => {
            let mut pay_config = config.payloader;
            // Input is split into whole access units below.
            pay_config.alignment = Alignment::Au;
            if let Some(mtu) = mtu {
                pay_config.mtu = mtu;
            }
            if let Some(secs) = config_interval {
                pay_config.config_interval = ConfigInterval::from_secs(secs)?;
            }
            if let Some(mode) = aggregate_mode {
                pay_config.aggregate_mode = mode;
            }
            if let Some(pt) = pt {
                pay_config.payload_type = pt;
            }
            if let Some(ssrc) = ssrc {
                pay_config.ssrc = ssrc;
            }
            let payloader = Payloader::new(pay_config)?;
            pay(payloader, &input, &output, fps)
        }
        Command::Depay { input, output } => {
            let depayloader = Depayloader::new(config.depayloader)?;
            depay(depayloader, &input, &output)
        }
    }
}

fn pay(mut payloader: Payloader, input: &Path, output: &Path, fps: u32) -> anyhow::Result<()> {
    let data = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let aus = split_access_units(Bytes::from(data));
    if aus.is_empty() {
        bail!("{}: no NAL units found", input.display());
    }

    tracing::info!(
        input = %input.display(),
        access_units = aus.len(),
        mtu = payloader.config().mtu,
        aggregate_mode = %payloader.config().aggregate_mode,
        latency_ms = payloader.latency(Some((fps, 1))).as_millis() as u64,
        "vvc-rtp pay starting"
    );

    let file = fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);

    for (i, au) in aus.into_iter().enumerate() {
        let pts = Duration::from_nanos(i as u64 * 1_000_000_000 / fps as u64);
        let buffer = VideoBuffer::new(au).with_pts(pts).with_marker(true);
        write_packets(&mut out, &payloader.push(buffer))?;
    }
    write_packets(&mut out, &payloader.handle_event(ControlEvent::EndOfStream))?;
    out.flush()?;

    println!("{}", serde_json::to_string_pretty(payloader.stats())?);
    Ok(())
}

fn write_packets(out: &mut impl Write, packets: &[RtpPacket]) -> anyhow::Result<()> {
    for packet in packets {
        let len = u16::try_from(packet.len()).context("RTP packet longer than 65535 bytes")?;
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&packet.encode())?;
    }
    Ok(())
}

fn depay(mut depayloader: Depayloader, input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut data = Bytes::from(fs::read(input).with_context(|| format!("reading {}", input.display()))?);
    let file = fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);

    tracing::info!(input = %input.display(), bytes = data.len(), "vvc-rtp depay starting");

    while data.remaining() >= 2 {
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            tracing::warn!(len, remaining = data.remaining(), "truncated packet at end of file");
            break;
        }
        let raw = data.split_to(len);
        let Some(packet) = RtpPacket::decode(raw) else {
            tracing::warn!(len, "skipping invalid RTP packet");
            continue;
        };
        for au in depayloader.push(&packet)? {
            out.write_all(&au.data)?;
        }
    }
    for au in depayloader.handle_event(ControlEvent::EndOfStream) {
        out.write_all(&au.data)?;
    }
    out.flush()?;

    println!("{}", serde_json::to_string_pretty(depayloader.stats())?);
    Ok(())
}
