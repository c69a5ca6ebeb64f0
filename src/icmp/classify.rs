use crate::wire::{
    ICMP_DEST_UNREACH, ICMP_ECHO_REPLY, ICMP_TIME_EXCEEDED, ICMPV6_DEST_UNREACH,
    ICMPV6_ECHO_REPLY, ICMPV6_PACKET_TOO_BIG, ICMPV6_TIME_EXCEEDED, IpVersion,
};

/// What an ICMP reply means for the hop that sent it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    /// The trace should stop at this hop
    pub final_hop: bool,
    /// Traceroute-style marker such as `!H` or `!F-1400`
    pub annotation: Option<String>,
}

impl Classification {
    fn in_transit() -> Self {
        Self::default()
    }

    fn reached() -> Self {
        Self {
            final_hop: true,
            annotation: None,
        }
    }

    fn annotated(annotation: impl Into<String>) -> Self {
        Self {
            final_hop: true,
            annotation: Some(annotation.into()),
        }
    }
}

/// Classify an ICMP reply by family, type and code.
///
/// `info` is the error's info word (next-hop MTU for fragmentation needed
/// and packet too big).
pub fn classify(version: IpVersion, icmp_type: u8, code: u8, info: u32) -> Classification {
    match version {
        IpVersion::V4 => classify_v4(icmp_type, code, info),
        IpVersion::V6 => classify_v6(icmp_type, code, info),
    }
}

fn classify_v4(icmp_type: u8, code: u8, info: u32) -> Classification {
    match (icmp_type, code) {
        (ICMP_TIME_EXCEEDED, 0) => Classification::in_transit(),
        (ICMP_ECHO_REPLY, _) => Classification::reached(),
        (ICMP_DEST_UNREACH, code) => match code {
            0 | 6 | 8 | 11 => Classification::annotated("!N"),
            1 | 7 | 12 => Classification::annotated("!H"),
            9 | 10 | 13 => Classification::annotated("!X"),
            3 => Classification::reached(),
            2 => Classification::annotated("!P"),
            4 => Classification::annotated(format!("!F-{}", info)),
            5 => Classification::annotated("!S"),
            14 => Classification::annotated("!V"),
            15 => Classification::annotated("!C"),
            other => Classification::annotated(format!("!<{}>", other)),
        },
        (other_type, other_code) => {
            Classification::annotated(format!("!<{}-{}>", other_type, other_code))
        }
    }
}

fn classify_v6(icmp_type: u8, code: u8, info: u32) -> Classification {
    match (icmp_type, code) {
        (ICMPV6_TIME_EXCEEDED, 0) => Classification::in_transit(),
        (ICMPV6_ECHO_REPLY, _) => Classification::reached(),
        (ICMPV6_PACKET_TOO_BIG, _) => Classification::annotated(format!("!F-{}", info)),
        (ICMPV6_DEST_UNREACH, code) => match code {
            0 => Classification::annotated("!N"),
            2 | 3 => Classification::annotated("!H"),
            1 => Classification::annotated("!X"),
            4 => Classification::reached(),
            other => Classification::annotated(format!("!<{}>", other)),
        },
        (other_type, other_code) => {
            Classification::annotated(format!("!<{}-{}>", other_type, other_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(version: IpVersion, t: u8, c: u8, info: u32) -> Option<String> {
        classify(version, t, c, info).annotation
    }

    #[test]
    fn test_time_exceeded_in_transit() {
        assert_eq!(classify(IpVersion::V4, 11, 0, 0), Classification::default());
        assert_eq!(classify(IpVersion::V6, 3, 0, 0), Classification::default());
    }

    #[test]
    fn test_port_unreachable_reaches_destination() {
        let v4 = classify(IpVersion::V4, 3, 3, 0);
        assert!(v4.final_hop);
        assert!(v4.annotation.is_none());

        let v6 = classify(IpVersion::V6, 1, 4, 0);
        assert!(v6.final_hop);
        assert!(v6.annotation.is_none());
    }

    #[test]
    fn test_ipv4_unreachable_codes() {
        let v4 = IpVersion::V4;
        for code in [0, 6, 8, 11] {
            assert_eq!(annotation(v4, 3, code, 0).as_deref(), Some("!N"));
        }
        for code in [1, 7, 12] {
            assert_eq!(annotation(v4, 3, code, 0).as_deref(), Some("!H"));
        }
        for code in [9, 10, 13] {
            assert_eq!(annotation(v4, 3, code, 0).as_deref(), Some("!X"));
        }
        assert_eq!(annotation(v4, 3, 2, 0).as_deref(), Some("!P"));
        assert_eq!(annotation(v4, 3, 4, 1400).as_deref(), Some("!F-1400"));
        assert_eq!(annotation(v4, 3, 5, 0).as_deref(), Some("!S"));
        assert_eq!(annotation(v4, 3, 14, 0).as_deref(), Some("!V"));
        assert_eq!(annotation(v4, 3, 15, 0).as_deref(), Some("!C"));
        assert_eq!(annotation(v4, 3, 42, 0).as_deref(), Some("!<42>"));
    }

    #[test]
    fn test_ipv6_unreachable_codes() {
        let v6 = IpVersion::V6;
        assert_eq!(annotation(v6, 1, 0, 0).as_deref(), Some("!N"));
        assert_eq!(annotation(v6, 1, 1, 0).as_deref(), Some("!X"));
        assert_eq!(annotation(v6, 1, 2, 0).as_deref(), Some("!H"));
        assert_eq!(annotation(v6, 1, 3, 0).as_deref(), Some("!H"));
        assert_eq!(annotation(v6, 1, 6, 0).as_deref(), Some("!<6>"));
        assert_eq!(annotation(v6, 2, 0, 1280).as_deref(), Some("!F-1280"));
    }

    #[test]
    fn test_unexpected_type_is_final() {
        let c = classify(IpVersion::V4, 11, 1, 0);
        assert!(c.final_hop);
        assert_eq!(c.annotation.as_deref(), Some("!<11-1>"));

        let c = classify(IpVersion::V6, 4, 0, 0);
        assert_eq!(c.annotation.as_deref(), Some("!<4-0>"));
    }

    #[test]
    fn test_echo_reply_reaches_destination() {
        assert_eq!(
            classify(IpVersion::V4, 0, 0, 0),
            Classification {
                final_hop: true,
                annotation: None
            }
        );
        assert!(classify(IpVersion::V6, 129, 0, 0).final_hop);
    }
}
