//! Matching inbound replies to outstanding probes.
//!
//! The correlator is a fixed-capacity table with LRU eviction driven by a
//! logical clock. Matching never removes an entry, so duplicate ICMP errors
//! for the same probe all resolve to it.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::WireError;
use crate::wire::{
    IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP, IcmpErrorFrame, IcmpMessage,
    QuotedPacket, QuotedTransport, parse_icmp_quote,
};

/// Transport a probe is sent over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    #[default]
    Udp,
    Tcp,
    /// Echo requests. Quotes of these carry no ports, so replies to them
    /// never correlate.
    Icmp,
}

impl std::str::FromStr for IpProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(IpProtocol::Udp),
            "tcp" => Ok(IpProtocol::Tcp),
            "icmp" => Ok(IpProtocol::Icmp),
            other => Err(format!("unknown protocol: {}. Use udp, tcp, or icmp", other)),
        }
    }
}

impl IpProtocol {
    /// IP protocol number. ICMP probes over IPv6 use 58.
    pub fn number(self, ipv6: bool) -> u8 {
        match self {
            IpProtocol::Udp => IPPROTO_UDP,
            IpProtocol::Tcp => IPPROTO_TCP,
            IpProtocol::Icmp if ipv6 => IPPROTO_ICMPV6,
            IpProtocol::Icmp => IPPROTO_ICMP,
        }
    }

    pub fn from_number(proto: u8) -> Option<Self> {
        match proto {
            IPPROTO_UDP => Some(IpProtocol::Udp),
            IPPROTO_TCP => Some(IpProtocol::Tcp),
            IPPROTO_ICMP | IPPROTO_ICMPV6 => Some(IpProtocol::Icmp),
            _ => None,
        }
    }
}

/// Correlation key of a probe, either as sent or as recovered from a quote
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeIdentity {
    pub protocol: IpProtocol,
    /// 0 means any source port
    pub src_port: u16,
    pub dst_port: u16,
    /// TCP sequence number, compared only for TCP
    pub sequence: u32,
    pub ttl: u8,
    pub flow_id: u32,
    pub timestamp_cookie: f64,
}

/// A probe that has been sent and may still be answered
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub identity: ProbeIdentity,
    pub dst_addr: SocketAddr,
    pub src_addr: Option<SocketAddr>,
    pub payload: Vec<u8>,
}

/// What a receive event turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultKind {
    /// Direct answer from the destination (echo reply, TCP reset)
    Ok,
    /// ICMP error from a router or the destination
    IcmpError,
    /// Error raised by the local stack
    LocalError,
    /// Nothing usable was received
    #[default]
    Empty,
}

/// Decoded inbound event, consumed immediately by the correlator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PacketResult {
    pub kind: ResultKind,
    pub sender: Option<IpAddr>,
    pub recv_time: f64,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub icmp_info: u32,
    /// Identity of the probe this event answers, recovered from the quote
    pub original_req: ProbeIdentity,
}

/// Recover the identity of the probe that provoked an ICMP error.
/// None when the quote's transport is neither UDP nor TCP.
pub fn extract_identity(quote: &QuotedPacket<'_>) -> Option<ProbeIdentity> {
    let base = ProbeIdentity {
        ttl: quote.quoted_ttl(),
        flow_id: quote.flow_label(),
        ..Default::default()
    };

    match quote.transport? {
        QuotedTransport::Udp(udp) => Some(ProbeIdentity {
            protocol: IpProtocol::Udp,
            src_port: udp.src_port,
            dst_port: udp.dst_port,
            ..base
        }),
        QuotedTransport::Tcp(tcp) => Some(ProbeIdentity {
            protocol: IpProtocol::Tcp,
            src_port: tcp.src_port,
            dst_port: tcp.dst_port,
            sequence: tcp.sequence,
            ..base
        }),
    }
}

impl PacketResult {
    /// Build an ICMP error result from its header and decoded quote
    pub fn from_quote(
        sender: IpAddr,
        recv_time: f64,
        icmp: &IcmpMessage<'_>,
        quote: &QuotedPacket<'_>,
    ) -> Option<Self> {
        let original_req = extract_identity(quote)?;
        Some(Self {
            kind: ResultKind::IcmpError,
            sender: Some(sender),
            recv_time,
            icmp_type: icmp.icmp_type,
            icmp_code: icmp.code,
            icmp_info: icmp.rest,
            original_req,
        })
    }

    /// Decode the quote carried by a raw-ring ICMP error.
    ///
    /// `Ok(None)` means the quote decoded but carries nothing we correlate on.
    pub fn from_frame(frame: &IcmpErrorFrame<'_>, recv_time: f64) -> Result<Option<Self>, WireError> {
        let quote = parse_icmp_quote(frame.quoted(), frame.version.is_ipv6())?;
        Ok(Self::from_quote(frame.source, recv_time, &frame.icmp, &quote))
    }
}

/// Whether `result` answers `probe`.
///
/// Protocol and destination port always count; the source port only when the
/// probe pinned one; the sequence number only for TCP.
pub fn is_match(result: &PacketResult, probe: &Probe) -> bool {
    let got = &result.original_req;
    let sent = &probe.identity;

    if got.protocol != sent.protocol || got.dst_port != sent.dst_port {
        return false;
    }
    if sent.src_port != 0 && got.src_port != sent.src_port {
        return false;
    }
    if sent.protocol == IpProtocol::Tcp && got.sequence != sent.sequence {
        return false;
    }
    true
}

/// Fixed-capacity store of in-flight probes
#[derive(Debug)]
pub struct Correlator {
    entries: Vec<Probe>,
    /// Logical tick of last insert or match, parallel to `entries`
    last_used: Vec<u64>,
    capacity: usize,
    tick: u64,
}

impl Correlator {
    /// Capacity is fixed for the life of the correlator; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            last_used: Vec::with_capacity(capacity),
            capacity,
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Store a probe. When full, the least recently used entry is replaced
    /// and returned. Duplicate identities are not checked for.
    pub fn insert(&mut self, probe: Probe) -> Option<Probe> {
        let tick = self.next_tick();

        if self.entries.len() < self.capacity {
            self.entries.push(probe);
            self.last_used.push(tick);
            return None;
        }

        // min_by_key keeps the first of equal minima, so ties go to the lowest index
        let (victim, _) = self
            .last_used
            .iter()
            .enumerate()
            .min_by_key(|&(_, &used)| used)?;

        let evicted = std::mem::replace(&mut self.entries[victim], probe);
        self.last_used[victim] = tick;
        debug!(
            slot = victim,
            dst_port = evicted.identity.dst_port,
            ttl = evicted.identity.ttl,
            "correlator full, evicted least recently used probe"
        );
        Some(evicted)
    }

    /// First stored probe answered by `result`, in insertion order. The match
    /// refreshes the probe's recency but leaves it in place.
    pub fn find_match(&mut self, result: &PacketResult) -> Option<&Probe> {
        let Some(idx) = self.entries.iter().position(|p| is_match(result, p)) else {
            trace!(
                dst_port = result.original_req.dst_port,
                src_port = result.original_req.src_port,
                "reply matched no outstanding probe"
            );
            return None;
        };

        let tick = self.next_tick();
        self.last_used[idx] = tick;
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Probe> {
        self.entries.iter()
    }
}
