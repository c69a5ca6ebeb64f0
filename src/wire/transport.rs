//! Fixed-offset UDP, TCP, ICMP and ICMPv6 header decoders.

use super::{be16, be32};
use crate::error::WireError;

pub const UDP_HEADER_LEN: usize = 8;
pub const TCP_MIN_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;

// ICMPv4 types we act on
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

// ICMPv6 types we act on
pub const ICMPV6_DEST_UNREACH: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
    pub payload: &'a [u8],
}

pub fn parse_udp(buf: &[u8]) -> Result<UdpDatagram<'_>, WireError> {
    if buf.len() < UDP_HEADER_LEN {
        return Err(WireError::truncated("udp", UDP_HEADER_LEN, buf.len()));
    }

    let length = be16(buf, 4);
    if (length as usize) < UDP_HEADER_LEN {
        return Err(WireError::invalid("udp", "length field shorter than header"));
    }

    let end = (length as usize).min(buf.len());

    Ok(UdpDatagram {
        src_port: be16(buf, 0),
        dst_port: be16(buf, 2),
        length,
        checksum: be16(buf, 6),
        payload: &buf[UDP_HEADER_LEN..end],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    /// Header length in 32-bit words
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    pub options: &'a [u8],
    pub payload: &'a [u8],
}

impl TcpSegment<'_> {
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }

    pub fn is_syn(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & 0x04 != 0
    }
}

pub fn parse_tcp(buf: &[u8]) -> Result<TcpSegment<'_>, WireError> {
    if buf.len() < TCP_MIN_HEADER_LEN {
        return Err(WireError::truncated("tcp", TCP_MIN_HEADER_LEN, buf.len()));
    }

    let data_offset = buf[12] >> 4;
    let header_len = data_offset as usize * 4;
    if header_len < TCP_MIN_HEADER_LEN {
        return Err(WireError::invalid("tcp", "data offset below 5 words"));
    }
    if buf.len() < header_len {
        return Err(WireError::truncated("tcp", header_len, buf.len()));
    }

    Ok(TcpSegment {
        src_port: be16(buf, 0),
        dst_port: be16(buf, 2),
        sequence: be32(buf, 4),
        acknowledgment: be32(buf, 8),
        data_offset,
        flags: buf[13],
        window: be16(buf, 14),
        options: &buf[TCP_MIN_HEADER_LEN..header_len],
        payload: &buf[header_len..],
    })
}

/// ICMP or ICMPv6 message. Both share the 8-byte header shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpMessage<'a> {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    /// Second header word (identifier/sequence, MTU, pointer, RFC 4884 length)
    pub rest: u32,
    pub payload: &'a [u8],
}

impl IcmpMessage<'_> {
    pub fn identifier(&self) -> u16 {
        (self.rest >> 16) as u16
    }

    pub fn sequence(&self) -> u16 {
        self.rest as u16
    }

    /// Next-hop MTU of an ICMPv4 Fragmentation Needed message
    pub fn next_hop_mtu(&self) -> u16 {
        self.rest as u16
    }

    /// RFC 4884 original-datagram length octet (second octet of the word).
    /// Counted in 32-bit words for ICMPv4 and 64-bit words for ICMPv6.
    pub fn original_datagram_words(&self, is_ipv6: bool) -> u8 {
        if is_ipv6 {
            (self.rest >> 24) as u8
        } else {
            (self.rest >> 16) as u8
        }
    }
}

fn parse_icmp_common<'a>(layer: &'static str, buf: &'a [u8]) -> Result<IcmpMessage<'a>, WireError> {
    if buf.len() < ICMP_HEADER_LEN {
        return Err(WireError::truncated(layer, ICMP_HEADER_LEN, buf.len()));
    }

    Ok(IcmpMessage {
        icmp_type: buf[0],
        code: buf[1],
        checksum: be16(buf, 2),
        rest: be32(buf, 4),
        payload: &buf[ICMP_HEADER_LEN..],
    })
}

pub fn parse_icmp(buf: &[u8]) -> Result<IcmpMessage<'_>, WireError> {
    parse_icmp_common("icmp", buf)
}

pub fn parse_icmpv6(buf: &[u8]) -> Result<IcmpMessage<'_>, WireError> {
    parse_icmp_common("icmpv6", buf)
}
