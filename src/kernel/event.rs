//! Telemetry records emitted by the kernel probe program.
//!
//! The record is a fixed wire format shared with the kernel side. Scalars
//! are host byte order, addresses network order. Changing the layout is a
//! protocol change on both sides.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, trace};

use crate::error::WireError;
use crate::icmp::classify;
use crate::state::ProbeRegistry;
use crate::wire::{IPPROTO_UDP, IpVersion};

/// Size of the record including trailing padding
pub const PROBE_EVENT_LEN: usize = 72;

const SADDR: usize = 0;
const DADDR: usize = 16;
const SPORT: usize = 32;
const DPORT: usize = 34;
const PROTOCOL: usize = 36;
const TTL: usize = 37;
const SEND_NS: usize = 40;
const RECV_NS: usize = 48;
const ICMP_TYPE: usize = 56;
const ICMP_CODE: usize = 57;
const IFINDEX: usize = 60;
const IS_REPLY: usize = 64;

/// One decoded telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeEvent {
    /// Source address; IPv4 occupies the first four bytes
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub sport: u16,
    /// Probe sequence key
    pub dport: u16,
    pub protocol: u8,
    pub ttl: u8,
    pub send_time_ns: u64,
    pub recv_time_ns: u64,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub ifindex: u32,
    /// false for a probe leaving the host, true for the reply
    pub is_reply: bool,
}

fn ne_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([buf[off], buf[off + 1]])
}

fn ne_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn ne_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_ne_bytes(raw)
}

fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / 1e9
}

impl ProbeEvent {
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PROBE_EVENT_LEN {
            return Err(WireError::invalid("probe-event", "record shorter than 72 bytes"));
        }

        let mut saddr = [0u8; 16];
        saddr.copy_from_slice(&buf[SADDR..SADDR + 16]);
        let mut daddr = [0u8; 16];
        daddr.copy_from_slice(&buf[DADDR..DADDR + 16]);

        Ok(Self {
            saddr,
            daddr,
            sport: ne_u16(buf, SPORT),
            dport: ne_u16(buf, DPORT),
            protocol: buf[PROTOCOL],
            ttl: buf[TTL],
            send_time_ns: ne_u64(buf, SEND_NS),
            recv_time_ns: ne_u64(buf, RECV_NS),
            icmp_type: buf[ICMP_TYPE],
            icmp_code: buf[ICMP_CODE],
            ifindex: ne_u32(buf, IFINDEX),
            is_reply: buf[IS_REPLY] != 0,
        })
    }

    /// Encode in the kernel layout, padding zeroed
    pub fn to_bytes(&self) -> [u8; PROBE_EVENT_LEN] {
        let mut buf = [0u8; PROBE_EVENT_LEN];
        buf[SADDR..SADDR + 16].copy_from_slice(&self.saddr);
        buf[DADDR..DADDR + 16].copy_from_slice(&self.daddr);
        buf[SPORT..SPORT + 2].copy_from_slice(&self.sport.to_ne_bytes());
        buf[DPORT..DPORT + 2].copy_from_slice(&self.dport.to_ne_bytes());
        buf[PROTOCOL] = self.protocol;
        buf[TTL] = self.ttl;
        buf[SEND_NS..SEND_NS + 8].copy_from_slice(&self.send_time_ns.to_ne_bytes());
        buf[RECV_NS..RECV_NS + 8].copy_from_slice(&self.recv_time_ns.to_ne_bytes());
        buf[ICMP_TYPE] = self.icmp_type;
        buf[ICMP_CODE] = self.icmp_code;
        buf[IFINDEX..IFINDEX + 4].copy_from_slice(&self.ifindex.to_ne_bytes());
        buf[IS_REPLY] = self.is_reply as u8;
        buf
    }

    /// IPv4 view of the source address
    pub fn source_v4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.saddr[0], self.saddr[1], self.saddr[2], self.saddr[3])
    }
}

/// What applying an event did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// No probe registered under the record's sequence key
    UnknownProbe,
    /// The probe was already finalized
    AlreadyDone,
    /// Send time stamped
    Sent,
    /// Reply recorded and probe finalized
    Replied,
}

/// Decode a record and apply it to the probe it names.
///
/// Late and duplicate events are expected and are no-ops, not errors. Only
/// UDP replies carry a usable reply address; the kernel side reports IPv4
/// sources only.
pub fn apply_event<R: ProbeRegistry + ?Sized>(
    registry: &mut R,
    buf: &[u8],
) -> Result<EventOutcome, WireError> {
    let event = ProbeEvent::decode(buf)?;
    let seq = event.dport as u32;

    let Some(probe) = registry.lookup(seq) else {
        trace!(seq, "kernel event for unknown probe");
        return Ok(EventOutcome::UnknownProbe);
    };
    if probe.done {
        trace!(seq, "kernel event for finished probe");
        return Ok(EventOutcome::AlreadyDone);
    }

    if !event.is_reply {
        probe.send_time = ns_to_secs(event.send_time_ns);
        return Ok(EventOutcome::Sent);
    }

    probe.send_time = ns_to_secs(event.send_time_ns);
    probe.recv_time = ns_to_secs(event.recv_time_ns);
    if event.protocol == IPPROTO_UDP {
        probe.reply_addr = Some(IpAddr::V4(event.source_v4()));
    }
    probe.apply_classification(classify(
        IpVersion::V4,
        event.icmp_type,
        event.icmp_code,
        0,
    ));
    probe.done = true;

    debug!(
        seq,
        ttl = probe.ttl,
        icmp_type = event.icmp_type,
        icmp_code = event.icmp_code,
        "kernel reply recorded"
    );
    registry.mark_done(seq);
    Ok(EventOutcome::Replied)
}
