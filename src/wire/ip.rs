use std::net::{Ipv4Addr, Ipv6Addr};

use super::{
    IPPROTO_AH, IPPROTO_DSTOPTS, IPPROTO_FRAGMENT, IPPROTO_HOPOPTS, IPPROTO_ROUTING, be16,
};
use crate::error::WireError;

/// Minimum IPv4 header (IHL = 5)
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// Fixed IPv6 header
pub const IPV6_HEADER_LEN: usize = 40;
/// Extension headers walked before a chain is considered forged
pub const MAX_EXTENSION_HEADERS: usize = 10;

/// Decoded IPv4 header plus the payload it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Packet<'a> {
    /// Header length in 32-bit words
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Payload clamped to min(total_length, captured length)
    pub payload: &'a [u8],
}

impl Ipv4Packet<'_> {
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }
}

/// Decode an IPv4 header.
///
/// Options are skipped, not interpreted. The payload trusts the smaller of
/// the declared total length and the captured length, so a truncated quote
/// still decodes.
pub fn parse_ipv4(buf: &[u8]) -> Result<Ipv4Packet<'_>, WireError> {
    if buf.len() < IPV4_MIN_HEADER_LEN {
        return Err(WireError::truncated("ipv4", IPV4_MIN_HEADER_LEN, buf.len()));
    }

    let version = buf[0] >> 4;
    if version != 4 {
        return Err(WireError::UnsupportedVersion {
            layer: "ipv4",
            version,
        });
    }

    let ihl = buf[0] & 0x0F;
    if ihl < 5 {
        return Err(WireError::invalid("ipv4", "header length below 5 words"));
    }

    let header_len = ihl as usize * 4;
    if buf.len() < header_len {
        return Err(WireError::truncated("ipv4", header_len, buf.len()));
    }

    let total_length = be16(buf, 2);
    if (total_length as usize) < header_len {
        return Err(WireError::invalid("ipv4", "total length shorter than header"));
    }

    let end = (total_length as usize).min(buf.len());

    Ok(Ipv4Packet {
        ihl,
        tos: buf[1],
        total_length,
        identification: be16(buf, 4),
        ttl: buf[8],
        protocol: buf[9],
        src: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
        dst: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
        payload: &buf[header_len..end],
    })
}

/// Decoded fixed IPv6 header plus the payload it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Packet<'a> {
    pub traffic_class: u8,
    /// 20-bit flow label
    pub flow_label: u32,
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    /// Payload clamped to min(payload_length, captured length - 40)
    pub payload: &'a [u8],
}

pub fn parse_ipv6(buf: &[u8]) -> Result<Ipv6Packet<'_>, WireError> {
    if buf.len() < IPV6_HEADER_LEN {
        return Err(WireError::truncated("ipv6", IPV6_HEADER_LEN, buf.len()));
    }

    let version = buf[0] >> 4;
    if version != 6 {
        return Err(WireError::UnsupportedVersion {
            layer: "ipv6",
            version,
        });
    }

    let payload_length = be16(buf, 4);
    let available = buf.len() - IPV6_HEADER_LEN;
    let payload_len = (payload_length as usize).min(available);

    let mut src = [0u8; 16];
    src.copy_from_slice(&buf[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&buf[24..40]);

    Ok(Ipv6Packet {
        traffic_class: (buf[0] << 4) | (buf[1] >> 4),
        flow_label: ((buf[1] as u32 & 0x0F) << 16) | ((buf[2] as u32) << 8) | buf[3] as u32,
        payload_length,
        next_header: buf[6],
        hop_limit: buf[7],
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
        payload: &buf[IPV6_HEADER_LEN..IPV6_HEADER_LEN + payload_len],
    })
}

/// Upper-layer payload found behind an IPv6 extension chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Payload<'a> {
    pub header: Ipv6Packet<'a>,
    /// Protocol of the first non-extension header
    pub protocol: u8,
    pub payload: &'a [u8],
    /// Number of extension headers skipped
    pub extensions: usize,
}

fn is_extension_header(next_header: u8) -> bool {
    matches!(
        next_header,
        IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_FRAGMENT | IPPROTO_DSTOPTS | IPPROTO_AH
    )
}

/// Length of one extension header in bytes, from its own length octet.
fn extension_len(next_header: u8, len_octet: u8) -> usize {
    match next_header {
        // Fixed size, the second octet is reserved
        IPPROTO_FRAGMENT => 8,
        // RFC 4302: 32-bit words minus 2
        IPPROTO_AH => (len_octet as usize + 2) * 4,
        // RFC 8200: 8-octet units not counting the first 8
        _ => (len_octet as usize + 1) * 8,
    }
}

/// Decode an IPv6 header and walk its extension chain to the upper layer.
///
/// Unknown next-header values end the walk without error; the caller decides
/// whether it recognises the protocol.
pub fn ipv6_find_payload(buf: &[u8]) -> Result<Ipv6Payload<'_>, WireError> {
    let header = parse_ipv6(buf)?;

    let mut protocol = header.next_header;
    let mut rest = header.payload;
    let mut walked = 0;

    while is_extension_header(protocol) {
        if walked >= MAX_EXTENSION_HEADERS {
            return Err(WireError::LoopDetected {
                limit: MAX_EXTENSION_HEADERS,
            });
        }
        walked += 1;

        // Every extension header is at least 8 bytes
        if rest.len() < 8 {
            return Err(WireError::truncated("ipv6-ext", 8, rest.len()));
        }

        let ext_len = extension_len(protocol, rest[1]);
        if rest.len() < ext_len {
            return Err(WireError::truncated("ipv6-ext", ext_len, rest.len()));
        }

        protocol = rest[0];
        rest = &rest[ext_len..];
    }

    Ok(Ipv6Payload {
        header,
        protocol,
        payload: rest,
        extensions: walked,
    })
}
