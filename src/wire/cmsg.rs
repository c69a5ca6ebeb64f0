//! Ancillary data delivered with error-queue reads.
//!
//! Record levels and types are the Linux ABI values. Scalars inside records
//! are host byte order; socket addresses keep ports and addresses in network
//! order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::WireError;

pub const SOL_IP: i32 = 0;
pub const SOL_SOCKET: i32 = 1;
pub const SOL_IPV6: i32 = 41;
pub const IP_RECVERR: i32 = 11;
pub const IPV6_RECVERR: i32 = 25;
pub const SO_TIMESTAMP: i32 = 29;
pub const SO_TIMESTAMPNS: i32 = 35;
pub const SO_TIMESTAMPING: i32 = 37;

const AF_INET: u16 = 2;
const AF_INET6: u16 = 10;

/// `struct sock_extended_err`
pub const EXTENDED_ERROR_LEN: usize = 16;
/// `struct cmsghdr` on LP64
pub const CMSG_HEADER_LEN: usize = 16;
const CMSG_ALIGN: usize = 8;

/// `SO_EE_ORIGIN_*`
pub const ORIGIN_LOCAL: u8 = 1;
pub const ORIGIN_ICMP: u8 = 2;
pub const ORIGIN_ICMP6: u8 = 3;

/// One ancillary record, level/type plus the data after the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage<'a> {
    pub level: i32,
    pub kind: i32,
    pub data: &'a [u8],
}

/// Decoded `sock_extended_err`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedError {
    pub errno: u32,
    pub origin: u8,
    pub icmp_type: u8,
    pub icmp_code: u8,
    pub info: u32,
    pub data: u32,
}

impl ExtendedError {
    pub fn is_icmp(&self) -> bool {
        matches!(self.origin, ORIGIN_ICMP | ORIGIN_ICMP6)
    }

    pub fn is_local(&self) -> bool {
        self.origin == ORIGIN_LOCAL
    }
}

/// What we learned from one batch of control messages
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInfo {
    pub extended_error: Option<ExtendedError>,
    /// Router that generated the ICMP error (`SO_EE_OFFENDER`)
    pub offender: Option<SocketAddr>,
    /// Receive time in seconds, hardware stamp preferred over software
    pub timestamp: Option<f64>,
}

fn ne_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn ne_i64(buf: &[u8], off: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    i64::from_ne_bytes(raw)
}

fn decode_extended_error(data: &[u8]) -> Result<ExtendedError, WireError> {
    if data.len() < EXTENDED_ERROR_LEN {
        return Err(WireError::MalformedRecord {
            expected: EXTENDED_ERROR_LEN,
            actual: data.len(),
        });
    }

    Ok(ExtendedError {
        errno: ne_u32(data, 0),
        origin: data[4],
        icmp_type: data[5],
        icmp_code: data[6],
        info: ne_u32(data, 8),
        data: ne_u32(data, 12),
    })
}

/// Offender sockaddr directly follows the extended error record.
/// Absent or unknown families decode to None.
fn decode_offender(data: &[u8]) -> Option<SocketAddr> {
    let sa = data.get(EXTENDED_ERROR_LEN..)?;
    let family = u16::from_ne_bytes([*sa.first()?, *sa.get(1)?]);

    match family {
        AF_INET if sa.len() >= 8 => {
            let port = u16::from_be_bytes([sa[2], sa[3]]);
            let addr = Ipv4Addr::new(sa[4], sa[5], sa[6], sa[7]);
            Some(SocketAddr::new(IpAddr::V4(addr), port))
        }
        AF_INET6 if sa.len() >= 24 => {
            let port = u16::from_be_bytes([sa[2], sa[3]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&sa[8..24]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

/// `struct timespec` / `struct timeval` pair at `off`, as seconds.
/// `divisor` is 1e9 for nanoseconds, 1e6 for microseconds.
fn decode_time(data: &[u8], off: usize, divisor: f64) -> Option<f64> {
    if data.len() < off + 16 {
        return None;
    }
    let secs = ne_i64(data, off);
    let frac = ne_i64(data, off + 8);
    if secs == 0 && frac == 0 {
        return None;
    }
    Some(secs as f64 + frac as f64 / divisor)
}

/// Extract the extended error, offender, and receive timestamp from a set of
/// control messages. Records may arrive in any order; a raw hardware stamp
/// from `SO_TIMESTAMPING` wins over any software stamp.
pub fn parse_control_messages<'a, I>(records: I) -> Result<ControlInfo, WireError>
where
    I: IntoIterator<Item = ControlMessage<'a>>,
{
    let mut info = ControlInfo::default();
    let mut software = None;
    let mut hardware = None;

    for record in records {
        match (record.level, record.kind) {
            (SOL_IP, IP_RECVERR) | (SOL_IPV6, IPV6_RECVERR) => {
                info.extended_error = Some(decode_extended_error(record.data)?);
                info.offender = decode_offender(record.data);
            }
            (SOL_SOCKET, SO_TIMESTAMPNS) => {
                if let Some(ts) = decode_time(record.data, 0, 1e9) {
                    software = Some(ts);
                }
            }
            (SOL_SOCKET, SO_TIMESTAMP) => {
                if let Some(ts) = decode_time(record.data, 0, 1e6) {
                    software = Some(ts);
                }
            }
            (SOL_SOCKET, SO_TIMESTAMPING) => {
                // [software, transformed hardware, raw hardware]
                if let Some(ts) = decode_time(record.data, 32, 1e9) {
                    hardware = Some(ts);
                } else if let Some(ts) = decode_time(record.data, 0, 1e9) {
                    software = Some(ts);
                }
            }
            _ => {}
        }
    }

    info.timestamp = hardware.or(software);
    Ok(info)
}

/// Split a raw `msg_control` buffer into records.
///
/// Each record is a 16-byte header (`cmsg_len`, level, type) followed by data;
/// the next record starts at the 8-byte aligned end of the previous one.
pub fn split_control_buffer(buf: &[u8]) -> Result<Vec<ControlMessage<'_>>, WireError> {
    let mut records = Vec::new();
    let mut rest = buf;

    while rest.len() >= CMSG_HEADER_LEN {
        let mut len_raw = [0u8; 8];
        len_raw.copy_from_slice(&rest[0..8]);
        let cmsg_len = u64::from_ne_bytes(len_raw) as usize;
        if cmsg_len < CMSG_HEADER_LEN {
            return Err(WireError::MalformedRecord {
                expected: CMSG_HEADER_LEN,
                actual: cmsg_len,
            });
        }
        if cmsg_len > rest.len() {
            return Err(WireError::truncated("cmsg", cmsg_len, rest.len()));
        }

        records.push(ControlMessage {
            level: ne_u32(rest, 8) as i32,
            kind: ne_u32(rest, 12) as i32,
            data: &rest[CMSG_HEADER_LEN..cmsg_len],
        });

        let advance = cmsg_len.div_ceil(CMSG_ALIGN) * CMSG_ALIGN;
        rest = rest.get(advance..).unwrap_or(&[]);
    }

    Ok(records)
}
