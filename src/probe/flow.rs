/// IPv6 flow labels are 20 bits
pub const FLOW_LABEL_MASK: u32 = 0x000F_FFFF;

/// Header values that make one outstanding probe distinguishable from the
/// others in flight. Pure function of (base, index), so a late or duplicated
/// reply maps back to the same probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FlowIdentity {
    pub src_port: u16,
    pub dst_port: u16,
    pub flow_label: u32,
    pub sequence: u32,
}

/// UDP: walk the destination port, keep the source port fixed.
/// Ports wrap at 65535.
pub fn derive_udp(base_dst_port: u16, src_port: u16, probe_idx: u32) -> FlowIdentity {
    FlowIdentity {
        src_port,
        dst_port: base_dst_port.wrapping_add(probe_idx as u16),
        ..Default::default()
    }
}

/// TCP: keep the destination port, walk the source port, and reuse the index
/// as the initial sequence number.
pub fn derive_tcp(dst_port: u16, base_src_port: u16, probe_idx: u32) -> FlowIdentity {
    FlowIdentity {
        src_port: base_src_port.wrapping_add(probe_idx as u16),
        dst_port,
        sequence: probe_idx,
        ..Default::default()
    }
}

/// IPv6: walk the flow label within its 20-bit field.
pub fn derive_ipv6(base_flow_label: u32, probe_idx: u32) -> FlowIdentity {
    FlowIdentity {
        flow_label: base_flow_label.wrapping_add(probe_idx) & FLOW_LABEL_MASK,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_udp() {
        let flow = derive_udp(33434, 12345, 2);
        assert_eq!(flow.src_port, 12345);
        assert_eq!(flow.dst_port, 33436);
        assert_eq!(flow.sequence, 0);
        assert_eq!(flow.flow_label, 0);
    }

    #[test]
    fn test_derive_tcp() {
        let flow = derive_tcp(80, 50000, 5);
        assert_eq!(flow.src_port, 50005);
        assert_eq!(flow.dst_port, 80);
        assert_eq!(flow.sequence, 5);
    }

    #[test]
    fn test_derive_ipv6_wraps_20_bits() {
        assert_eq!(derive_ipv6(0x12345, 1).flow_label, 0x12346);
        assert_eq!(derive_ipv6(0xFFFFF, 1).flow_label, 0);
        assert_eq!(derive_ipv6(0xFFFFFFFF, 3).flow_label, 0x00002);
    }

    #[test]
    fn test_ports_wrap() {
        assert_eq!(derive_udp(65535, 0, 1).dst_port, 0);
        assert_eq!(derive_tcp(443, 65534, 3).src_port, 1);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn proptest_derivation_is_deterministic(
            base in any::<u16>(),
            other in any::<u16>(),
            label in any::<u32>(),
            idx in any::<u32>()
        ) {
            prop_assert_eq!(derive_udp(base, other, idx), derive_udp(base, other, idx));
            prop_assert_eq!(derive_tcp(base, other, idx), derive_tcp(base, other, idx));
            prop_assert_eq!(derive_ipv6(label, idx), derive_ipv6(label, idx));
        }

        #[test]
        fn proptest_flow_label_in_range(label in any::<u32>(), idx in any::<u32>()) {
            prop_assert!(derive_ipv6(label, idx).flow_label <= FLOW_LABEL_MASK);
        }

        #[test]
        fn proptest_distinct_indices_distinct_ports(base in any::<u16>(), a in 0u32..256, b in 0u32..256) {
            prop_assume!(a != b);
            prop_assert_ne!(derive_udp(base, 0, a).dst_port, derive_udp(base, 0, b).dst_port);
        }
    }
}
