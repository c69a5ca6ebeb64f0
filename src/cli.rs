use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::TraceConfig;
use crate::export::{TraceHeader, write_end, write_header};
use crate::icmp::{classify, decode_extensions, extensions_for};
use crate::kernel::ProbeEvent;
use crate::probe::{IpProtocol, PacketResult, ProbeIdentity, extract_identity};
use crate::state::Dispatch;
use crate::wire::{IcmpMessage, IpVersion, parse_frame, parse_icmp_quote};

/// Offline traceroute toolkit: probe planning and reply decoding
#[derive(Parser, Debug, Clone)]
#[command(name = "hoptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Only log errors
    #[arg(long = "quiet", global = true)]
    pub quiet: bool,

    /// JSON trace configuration; command-line options override it
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the probe schedule and flow identities as JSON lines
    Plan(PlanArgs),
    /// Decode the quoted datagram of an ICMP error (hex, after the ICMP header)
    Quote {
        hex: String,
        /// The quote is an IPv6 packet
        #[arg(short = '6', long = "ipv6")]
        ipv6: bool,
    },
    /// Decode an ICMP extension block (hex, starting at the extension header)
    Ext { hex: String },
    /// Decode a raw Ethernet frame carrying an ICMP error (hex)
    Frame { hex: String },
    /// Decode one kernel telemetry record (hex)
    Event { hex: String },
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlanArgs {
    /// Destination address
    pub target: IpAddr,

    /// First TTL to probe
    #[arg(short = 'f', long = "first-hop")]
    pub first_hop: Option<u8>,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-ttl")]
    pub max_ttl: Option<u16>,

    /// Probes per hop
    #[arg(short = 'q', long = "queries")]
    pub queries: Option<u16>,

    /// Seconds to wait for each reply
    #[arg(short = 'w', long = "wait")]
    pub wait: Option<f64>,

    /// Probe protocol (udp, tcp, icmp). ICMP errors quoting an ICMP probe
    /// carry no ports, so icmp plans cannot be matched against replies.
    #[arg(short = 'P', long = "protocol")]
    pub protocol: Option<IpProtocol>,

    /// Base destination port (UDP) or fixed port (TCP)
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Source port (0 = any)
    #[arg(long = "src-port")]
    pub src_port: Option<u16>,

    /// Base IPv6 flow label
    #[arg(long = "flow-label")]
    pub flow_label: Option<u32>,

    /// Probes per second (0 = unlimited)
    #[arg(long = "rate")]
    pub rate: Option<f64>,

    /// Probes allowed back to back
    #[arg(long = "burst")]
    pub burst: Option<f64>,

    /// Stop scheduling after this many seconds (0 = never)
    #[arg(long = "deadline")]
    pub deadline: Option<f64>,
}

impl Args {
    /// Base configuration: the config file when given, defaults otherwise
    pub fn base_config(&self) -> Result<TraceConfig> {
        match &self.config {
            Some(path) => TraceConfig::from_file(path),
            None => Ok(TraceConfig::default()),
        }
    }
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex input ({} chars)", cleaned.len()))
}

/// One scheduled send in simulated time
#[derive(Debug, Serialize)]
struct PlannedProbe {
    #[serde(rename = "type")]
    kind: &'static str,
    time: f64,
    ttl: u8,
    probe: u32,
    seq: u32,
    #[serde(skip_serializing_if = "is_zero_u16")]
    src_port: u16,
    #[serde(skip_serializing_if = "is_zero_u16")]
    dst_port: u16,
    #[serde(skip_serializing_if = "is_zero_u32")]
    flow_label: u32,
    sequence: u32,
    /// Present, and false, only when replies to this probe cannot be matched
    #[serde(skip_serializing_if = "is_true")]
    correlated: bool,
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Smallest step the simulated clock takes when throttled
const MIN_CLOCK_STEP: f64 = 1e-9;

/// Advance the simulated clock by `step`, by at least one ulp even where
/// `now + step` rounds back to `now`.
fn advance_clock(now: f64, step: f64) -> f64 {
    let next = now + step;
    if next > now { next } else { now.next_up() }
}

/// Walk the schedule in simulated time starting at 0, honouring the token
/// bucket, and print every send.
pub fn run_plan<W: Write>(config: &TraceConfig, target: IpAddr, mut writer: W) -> Result<()> {
    config.validate()?;

    let ipv6 = target.is_ipv6();
    write_header(
        &mut writer,
        &TraceHeader {
            dst_name: None,
            dst_addr: target.to_string(),
            max_hops: config.max_ttl.min(255) as u8,
            packet_len: config.packet_len(ipv6),
        },
    )?;

    let correlated = config.protocol != IpProtocol::Icmp;
    if !correlated {
        warn!("ICMP probes have no quoted ports; replies to them cannot be correlated");
    }

    let mut pacer = config.pacer(0.0);
    let mut now = 0.0;
    let mut min_step = MIN_CLOCK_STEP;
    let mut sent = 0u32;
    loop {
        match pacer.poll(now) {
            Dispatch::Send { ttl, probe_idx, seq } => {
                min_step = MIN_CLOCK_STEP;
                let flow = config.flow_identity(seq, ipv6);
                let planned = PlannedProbe {
                    kind: "send",
                    time: now,
                    ttl,
                    probe: probe_idx as u32 + 1,
                    seq,
                    src_port: flow.src_port,
                    dst_port: flow.dst_port,
                    flow_label: flow.flow_label,
                    sequence: flow.sequence,
                    correlated,
                };
                serde_json::to_writer(&mut writer, &planned)?;
                writeln!(writer)?;
                sent += 1;
            }
            Dispatch::Throttled {
                retry_in: Some(retry),
            } => {
                now = advance_clock(now, retry.max(min_step));
                // Refill rounding can leave the bucket a hair short of a token
                // after the promised delay; widen the step until it lands.
                min_step *= 2.0;
                if !now.is_finite() {
                    bail!("simulated clock overflowed (rate={})", config.rate);
                }
            }
            Dispatch::Throttled { retry_in: None } => {
                bail!(
                    "rate limiter can never grant a probe (rate={}, burst={})",
                    config.rate,
                    config.burst
                );
            }
            Dispatch::Finished => break,
        }
    }

    write_end(&mut writer)?;
    info!(sent, elapsed = now, "plan complete");
    Ok(())
}

fn identity_json(identity: &ProbeIdentity) -> serde_json::Value {
    json!({
        "protocol": identity.protocol,
        "src_port": identity.src_port,
        "dst_port": identity.dst_port,
        "sequence": identity.sequence,
        "ttl": identity.ttl,
        "flow_id": identity.flow_id,
    })
}

pub fn run_quote<W: Write>(hex: &str, ipv6: bool, mut writer: W) -> Result<()> {
    let buf = decode_hex(hex)?;
    let quote = parse_icmp_quote(&buf, ipv6).context("Failed to decode quote")?;
    let version = if quote.is_ipv6() { 6 } else { 4 };

    let record = json!({
        "version": version,
        "destination": quote.original_destination().to_string(),
        "protocol": quote.transport_proto,
        "identity": extract_identity(&quote).as_ref().map(identity_json),
    });
    writeln!(writer, "{}", record)?;
    Ok(())
}

pub fn run_ext<W: Write>(hex: &str, mut writer: W) -> Result<()> {
    let buf = decode_hex(hex)?;
    match decode_extensions(&buf, 0) {
        Some(text) => writeln!(writer, "{}", text)?,
        None => bail!("No valid extension structure in {} bytes", buf.len()),
    }
    Ok(())
}

/// Info word handed to the classifier: the next-hop MTU for ICMPv4, the whole
/// word for ICMPv6 (Packet Too Big carries a 32-bit MTU)
fn classify_info(version: IpVersion, icmp: &IcmpMessage<'_>) -> u32 {
    match version {
        IpVersion::V4 => icmp.next_hop_mtu() as u32,
        IpVersion::V6 => icmp.rest,
    }
}

pub fn run_frame<W: Write>(hex: &str, mut writer: W) -> Result<()> {
    let buf = decode_hex(hex)?;
    let Some(frame) = parse_frame(&buf).context("Failed to decode frame")? else {
        debug!(len = buf.len(), "frame is not an ICMP error");
        writeln!(writer, "{}", json!({ "icmp_error": false }))?;
        return Ok(());
    };

    let ipv6 = frame.version.is_ipv6();
    let class = classify(
        frame.version,
        frame.icmp.icmp_type,
        frame.icmp.code,
        classify_info(frame.version, &frame.icmp),
    );
    let result = PacketResult::from_frame(&frame, 0.0).context("Failed to decode quote")?;

    let record = json!({
        "icmp_error": true,
        "source": frame.source.to_string(),
        "icmp_type": frame.icmp.icmp_type,
        "icmp_code": frame.icmp.code,
        "final": class.final_hop,
        "annotation": class.annotation,
        "extensions": extensions_for(&frame.icmp, ipv6),
        "identity": result.as_ref().map(|r| identity_json(&r.original_req)),
    });
    writeln!(writer, "{}", record)?;
    Ok(())
}

pub fn run_event<W: Write>(hex: &str, mut writer: W) -> Result<()> {
    let buf = decode_hex(hex)?;
    let event = ProbeEvent::decode(&buf).context("Failed to decode kernel record")?;
    let record = json!({
        "source": event.source_v4().to_string(),
        "sport": event.sport,
        "dport": event.dport,
        "protocol": event.protocol,
        "ttl": event.ttl,
        "send_time_ns": event.send_time_ns,
        "recv_time_ns": event.recv_time_ns,
        "icmp_type": event.icmp_type,
        "icmp_code": event.icmp_code,
        "ifindex": event.ifindex,
        "is_reply": event.is_reply,
    });
    writeln!(writer, "{}", record)?;
    Ok(())
}

/// Execute the parsed command line
pub fn run<W: Write>(args: &Args, writer: W) -> Result<()> {
    match &args.command {
        Command::Plan(plan) => {
            let config = args.base_config()?.with_overrides(plan);
            run_plan(&config, plan.target, writer)
        }
        Command::Quote { hex, ipv6 } => run_quote(hex, *ipv6, writer),
        Command::Ext { hex } => run_ext(hex, writer),
        Command::Frame { hex } => run_frame(hex, writer),
        Command::Event { hex } => run_event(hex, writer),
    }
}
