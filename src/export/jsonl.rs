//! JSON-lines trace output: one header, one record per probe, one end marker.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::state::{ProbeOutcome, ProbeTable};

pub const JSONL_VERSION: u32 = 1;

/// Trace-level metadata written before any probe
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHeader {
    pub dst_name: Option<String>,
    pub dst_addr: String,
    pub max_hops: u8,
    pub packet_len: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Header {
        version: u32,
        dst_name: Option<&'a str>,
        dst_addr: &'a str,
        max_hops: u8,
        packet_len: usize,
    },
    Probe {
        ttl: u8,
        probe: u32,
        replied: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        addr: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rtt_ms: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        err: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        extensions: Option<&'a str>,
    },
    End,
}

fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

fn write_record<W: Write>(writer: &mut W, record: &Record<'_>) -> Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writeln!(writer)?;
    Ok(())
}

pub fn write_header<W: Write>(writer: &mut W, header: &TraceHeader) -> Result<()> {
    write_record(
        writer,
        &Record::Header {
            version: JSONL_VERSION,
            dst_name: header.dst_name.as_deref(),
            dst_addr: &header.dst_addr,
            max_hops: header.max_hops,
            packet_len: header.packet_len,
        },
    )
}

/// Probe indices are 1-based in the output
pub fn write_probe<W: Write>(writer: &mut W, outcome: &ProbeOutcome) -> Result<()> {
    let replied = outcome.replied();
    write_record(
        writer,
        &Record::Probe {
            ttl: outcome.ttl,
            probe: outcome.probe_idx as u32 + 1,
            replied,
            addr: outcome.addr.map(|a| a.to_string()),
            rtt_ms: outcome.rtt_ms.filter(|_| replied).map(round_ms),
            err: outcome.err.as_deref().filter(|e| !e.is_empty()),
            extensions: outcome.extensions.as_deref(),
        },
    )
}

pub fn write_end<W: Write>(writer: &mut W) -> Result<()> {
    write_record(writer, &Record::End)
}

/// Header, every probe up to the final hop, end marker
pub fn export_jsonl<W: Write>(table: &ProbeTable, header: &TraceHeader, mut writer: W) -> Result<()> {
    write_header(&mut writer, header)?;
    let last = table.final_ttl();
    for probe in table.iter() {
        if let Some(last) = last
            && probe.ttl > last
        {
            break;
        }
        write_probe(&mut writer, &probe.outcome())?;
    }
    write_end(&mut writer)
}
