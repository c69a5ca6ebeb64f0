use std::net::{IpAddr, SocketAddr};

use super::correlate::{IpProtocol, Probe, ProbeIdentity};

/// Default UDP payload size
pub const DEFAULT_UDP_PAYLOAD: usize = 32;

/// Classic traceroute filler: `0x40 + (i & 0x3f)`, i.e. `@ABC...` repeating
pub fn build_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| 0x40 + (i & 0x3F) as u8).collect()
}

impl Probe {
    /// UDP probe to `dst:dst_port` sent with `ttl`. A zero `src_port` leaves
    /// the source to the kernel and matches any quoted source port.
    pub fn udp(dst: IpAddr, src_port: u16, dst_port: u16, ttl: u8, payload_len: usize) -> Self {
        Self {
            identity: ProbeIdentity {
                protocol: IpProtocol::Udp,
                src_port,
                dst_port,
                ttl,
                ..Default::default()
            },
            dst_addr: SocketAddr::new(dst, dst_port),
            src_addr: None,
            payload: build_payload(payload_len),
        }
    }

    /// TCP SYN probe. The sequence number doubles as a disambiguator.
    pub fn tcp(dst: IpAddr, src_port: u16, dst_port: u16, sequence: u32, ttl: u8) -> Self {
        Self {
            identity: ProbeIdentity {
                protocol: IpProtocol::Tcp,
                src_port,
                dst_port,
                sequence,
                ttl,
                ..Default::default()
            },
            dst_addr: SocketAddr::new(dst, dst_port),
            src_addr: None,
            payload: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_payload_pattern() {
        let payload = build_payload(70);
        assert_eq!(payload.len(), 70);
        assert_eq!(&payload[..4], b"@ABC");
        assert_eq!(payload[63], 0x7F);
        assert_eq!(payload[64], 0x40);
        assert!(build_payload(0).is_empty());
    }

    #[test]
    fn test_udp_probe() {
        let dst = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 10));
        let probe = Probe::udp(dst, 0, 33440, 7, DEFAULT_UDP_PAYLOAD);
        assert_eq!(probe.identity.protocol, IpProtocol::Udp);
        assert_eq!(probe.identity.dst_port, 33440);
        assert_eq!(probe.identity.ttl, 7);
        assert_eq!(probe.dst_addr, SocketAddr::new(dst, 33440));
        assert_eq!(probe.payload.len(), DEFAULT_UDP_PAYLOAD);
    }

    #[test]
    fn test_tcp_probe() {
        let dst = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 10));
        let probe = Probe::tcp(dst, 50003, 443, 3, 2);
        assert_eq!(probe.identity.protocol, IpProtocol::Tcp);
        assert_eq!(probe.identity.sequence, 3);
        assert!(probe.payload.is_empty());
    }
}
