//! The original packet echoed back inside an ICMP error.

use std::net::IpAddr;

use super::{
    IPPROTO_TCP, IPPROTO_UDP, IpVersion, Ipv4Packet, Ipv6Packet, TcpSegment, UdpDatagram,
    ipv6_find_payload, parse_ipv4, parse_tcp, parse_udp,
};
use crate::error::WireError;

/// Inner IP header of a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotedIp<'a> {
    V4(Ipv4Packet<'a>),
    V6(Ipv6Packet<'a>),
}

/// Inner transport header of a quote, when we recognise it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotedTransport<'a> {
    Udp(UdpDatagram<'a>),
    Tcp(TcpSegment<'a>),
}

/// A decoded ICMP quote. Borrows from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedPacket<'a> {
    pub ip: QuotedIp<'a>,
    /// Upper-layer protocol after any IPv6 extension headers
    pub transport_proto: u8,
    /// None when the inner protocol is neither UDP nor TCP
    pub transport: Option<QuotedTransport<'a>>,
}

impl QuotedPacket<'_> {
    pub fn version(&self) -> IpVersion {
        match self.ip {
            QuotedIp::V4(_) => IpVersion::V4,
            QuotedIp::V6(_) => IpVersion::V6,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.version().is_ipv6()
    }

    /// TTL or hop limit left in the quoted header when the router dropped it
    pub fn quoted_ttl(&self) -> u8 {
        match self.ip {
            QuotedIp::V4(ip) => ip.ttl,
            QuotedIp::V6(ip) => ip.hop_limit,
        }
    }

    /// Destination the original probe was sent to
    pub fn original_destination(&self) -> IpAddr {
        match self.ip {
            QuotedIp::V4(ip) => IpAddr::V4(ip.dst),
            QuotedIp::V6(ip) => IpAddr::V6(ip.dst),
        }
    }

    /// IPv6 flow label of the quoted header, 0 for IPv4
    pub fn flow_label(&self) -> u32 {
        match self.ip {
            QuotedIp::V4(_) => 0,
            QuotedIp::V6(ip) => ip.flow_label,
        }
    }
}

/// Decode the quote carried in an ICMP error payload.
///
/// An inner transport we do not know is not an error: the IP-level decode is
/// returned with `transport` unset. A recognised transport whose header is
/// broken is.
pub fn parse_icmp_quote(buf: &[u8], is_ipv6: bool) -> Result<QuotedPacket<'_>, WireError> {
    let (ip, transport_proto, payload) = if is_ipv6 {
        let found = ipv6_find_payload(buf)?;
        (QuotedIp::V6(found.header), found.protocol, found.payload)
    } else {
        let ip = parse_ipv4(buf)?;
        (QuotedIp::V4(ip), ip.protocol, ip.payload)
    };

    let transport = match transport_proto {
        IPPROTO_UDP => Some(QuotedTransport::Udp(parse_udp(payload)?)),
        IPPROTO_TCP => Some(QuotedTransport::Tcp(parse_tcp(payload)?)),
        _ => None,
    };

    Ok(QuotedPacket {
        ip,
        transport_proto,
        transport,
    })
}
