//! Raw Ethernet frames from a kernel-bypass receive ring.
//!
//! The kernel-side filter already redirects only ICMP errors, but the frame
//! is re-validated here since the ring hands us whatever the NIC wrote.

use std::net::IpAddr;

use super::{
    ICMP_DEST_UNREACH, ICMP_TIME_EXCEEDED, ICMPV6_DEST_UNREACH, ICMPV6_PACKET_TOO_BIG,
    ICMPV6_TIME_EXCEEDED, IPPROTO_ICMP, IPPROTO_ICMPV6, IcmpMessage, IpVersion, be16,
    ipv6_find_payload, parse_icmp, parse_icmpv6, parse_ipv4,
};
use crate::error::WireError;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// An ICMP error pulled off the wire, ready for quote decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpErrorFrame<'a> {
    pub version: IpVersion,
    /// Router that sent the error
    pub source: IpAddr,
    pub icmp: IcmpMessage<'a>,
}

impl<'a> IcmpErrorFrame<'a> {
    /// Bytes after the 8-byte ICMP header: the quote, then any extensions
    pub fn quoted(&self) -> &'a [u8] {
        self.icmp.payload
    }
}

fn is_ipv4_error(icmp_type: u8) -> bool {
    matches!(icmp_type, ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACH)
}

fn is_ipv6_error(icmp_type: u8) -> bool {
    matches!(
        icmp_type,
        ICMPV6_TIME_EXCEEDED | ICMPV6_DEST_UNREACH | ICMPV6_PACKET_TOO_BIG
    )
}

/// Decode an Ethernet II frame down to an ICMP error.
///
/// Returns `Ok(None)` for anything that is well formed but not an ICMP error
/// we care about (other ethertypes, other protocols, echo traffic).
pub fn parse_frame(buf: &[u8]) -> Result<Option<IcmpErrorFrame<'_>>, WireError> {
    if buf.len() < ETHERNET_HEADER_LEN {
        return Err(WireError::truncated("ethernet", ETHERNET_HEADER_LEN, buf.len()));
    }

    let ethertype = be16(buf, 12);
    let packet = &buf[ETHERNET_HEADER_LEN..];

    match ethertype {
        ETHERTYPE_IPV4 => {
            let ip = parse_ipv4(packet)?;
            if ip.protocol != IPPROTO_ICMP {
                return Ok(None);
            }
            let icmp = parse_icmp(ip.payload)?;
            if !is_ipv4_error(icmp.icmp_type) {
                return Ok(None);
            }
            Ok(Some(IcmpErrorFrame {
                version: IpVersion::V4,
                source: IpAddr::V4(ip.src),
                icmp,
            }))
        }
        ETHERTYPE_IPV6 => {
            let found = ipv6_find_payload(packet)?;
            if found.protocol != IPPROTO_ICMPV6 {
                return Ok(None);
            }
            let icmp = parse_icmpv6(found.payload)?;
            if !is_ipv6_error(icmp.icmp_type) {
                return Ok(None);
            }
            Ok(Some(IcmpErrorFrame {
                version: IpVersion::V6,
                source: IpAddr::V6(found.header.src),
                icmp,
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ICMPV6_ECHO_REPLY, IPPROTO_UDP};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ethernet(ethertype: u16) -> Vec<u8> {
        let mut buf = vec![0u8; ETHERNET_HEADER_LEN];
        buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
        buf
    }

    fn ipv4_icmp_frame(icmp_type: u8, quote_len: usize) -> Vec<u8> {
        let mut buf = ethernet(ETHERTYPE_IPV4);
        let total = 20 + 8 + quote_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        ip[8] = 250;
        ip[9] = IPPROTO_ICMP;
        ip[12..16].copy_from_slice(&[198, 51, 100, 1]);
        buf.extend(ip);
        buf.extend_from_slice(&[icmp_type, 0, 0, 0, 0, 0, 0, 0]);
        buf.extend(std::iter::repeat(0xEE).take(quote_len));
        buf
    }

    #[test]
    fn test_ipv4_time_exceeded() {
        let buf = ipv4_icmp_frame(ICMP_TIME_EXCEEDED, 28);
        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.version, IpVersion::V4);
        assert_eq!(frame.source, IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)));
        assert_eq!(frame.icmp.icmp_type, ICMP_TIME_EXCEEDED);
        assert_eq!(frame.quoted().len(), 28);
    }

    #[test]
    fn test_ipv4_echo_is_ignored() {
        let buf = ipv4_icmp_frame(0, 8);
        assert_eq!(parse_frame(&buf).unwrap(), None);
    }

    #[test]
    fn test_non_icmp_is_ignored() {
        let mut buf = ipv4_icmp_frame(ICMP_TIME_EXCEEDED, 8);
        buf[ETHERNET_HEADER_LEN + 9] = IPPROTO_UDP;
        assert_eq!(parse_frame(&buf).unwrap(), None);
        assert_eq!(parse_frame(&ethernet(0x0806)).unwrap(), None);
    }

    #[test]
    fn test_ipv6_packet_too_big() {
        let mut buf = ethernet(ETHERTYPE_IPV6);
        let mut ip = vec![0u8; 40];
        ip[0] = 0x60;
        ip[4..6].copy_from_slice(&16u16.to_be_bytes());
        ip[6] = IPPROTO_ICMPV6;
        ip[8..24].copy_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets());
        buf.extend(ip);
        buf.extend_from_slice(&[ICMPV6_PACKET_TOO_BIG, 0, 0, 0, 0, 0, 0x05, 0x00]);
        buf.extend_from_slice(&[0u8; 8]);

        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.version, IpVersion::V6);
        assert_eq!(
            frame.source,
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))
        );
        assert_eq!(frame.icmp.rest, 1280);

        let last = buf.len() - 16;
        buf[last] = ICMPV6_ECHO_REPLY;
        assert_eq!(parse_frame(&buf).unwrap(), None);
    }

    #[test]
    fn test_truncated_frames() {
        assert!(matches!(
            parse_frame(&[0u8; 13]),
            Err(WireError::Truncated { layer: "ethernet", .. })
        ));
        let buf = ipv4_icmp_frame(ICMP_TIME_EXCEEDED, 0);
        // Cut into the ICMP header
        let mut short = buf[..ETHERNET_HEADER_LEN + 24].to_vec();
        short[ETHERNET_HEADER_LEN + 2..ETHERNET_HEADER_LEN + 4]
            .copy_from_slice(&24u16.to_be_bytes());
        assert!(matches!(
            parse_frame(&short),
            Err(WireError::Truncated { layer: "icmp", .. })
        ));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn proptest_frame_never_panics(data in prop::collection::vec(any::<u8>(), 0..160)) {
            if let Ok(Some(frame)) = parse_frame(&data) {
                prop_assert!(frame.quoted().len() < data.len());
            }
        }
    }
}
