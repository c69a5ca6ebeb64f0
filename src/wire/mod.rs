//! Bounds-checked decoders for everything we read off the wire.
//!
//! Decoders borrow from the caller's buffer and reject it before touching
//! any field that would lie past its end.

pub mod cmsg;
pub mod frame;
pub mod ip;
pub mod quote;
pub mod transport;

pub use cmsg::*;
pub use frame::*;
pub use ip::*;
pub use quote::*;
pub use transport::*;

// IP protocol numbers
pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ROUTING: u8 = 43;
pub const IPPROTO_FRAGMENT: u8 = 44;
pub const IPPROTO_AH: u8 = 51;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_DSTOPTS: u8 = 60;

/// IP version of a packet or a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn is_ipv6(self) -> bool {
        matches!(self, IpVersion::V6)
    }
}

/// Read a big-endian u16 at `offset`. Callers check length first.
#[inline]
pub(crate) fn be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Read a big-endian u32 at `offset`. Callers check length first.
#[inline]
pub(crate) fn be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
