//! ICMP multi-part message extensions (RFC 4884).
//!
//! Decodes the extension structure appended after the quoted datagram into a
//! compact string: MPLS label stacks (RFC 4950), interface information
//! (RFC 5837), and a hex dump for any other object.

use std::fmt::Write;
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::debug;

use super::checksum::verify;
use crate::wire::IcmpMessage;

pub const EXTENSION_VERSION: u8 = 2;
/// Version/reserved octets plus the 16-bit checksum
pub const EXTENSION_HEADER_LEN: usize = 4;
/// Smallest region worth trying: header plus one object header
pub const MIN_EXTENSION_LEN: usize = 8;
pub const OBJECT_HEADER_LEN: usize = 4;

/// Where legacy (non-RFC 4884) routers put extensions
pub const LEGACY_ORIGINAL_DATAGRAM_LEN: usize = 128;
/// Stride when scanning for extensions without a length hint
pub const LEGACY_SCAN_STEP: usize = 4;

const MPLS_CLASS: u8 = 1;
const MPLS_CTYPE: u8 = 1;
const INTERFACE_INFO_CLASS: u8 = 2;

const INTERFACE_NAME_MAX: usize = 64;
/// index + (afi + IPv6) + name + mtu fits with room to spare
const INTERFACE_INFO_MAX: usize = 128;
const ROLES: [&str; 4] = ["INC", "SUB", "OUT", "NXT"];

/// One decoded MPLS label stack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MplsLabel {
    pub label: u32,
    pub exp: u8,
    pub bottom: bool,
    pub ttl: u8,
}

impl MplsLabel {
    pub fn from_word(word: u32) -> Self {
        Self {
            label: word >> 12,
            exp: ((word >> 9) & 0x7) as u8,
            bottom: (word >> 8) & 0x1 == 1,
            ttl: (word & 0xFF) as u8,
        }
    }
}

impl std::fmt::Display for MplsLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "L={},E={},S={},T={}",
            self.label, self.exp, self.bottom as u8, self.ttl
        )
    }
}

/// Decode extensions from `buf`.
///
/// With `step == 0` the structure must start at `buf[0]`. Otherwise each
/// offset `0, step, 2*step, ...` is tried while at least
/// [`MIN_EXTENSION_LEN`] bytes remain, and the first that decodes wins.
pub fn decode_extensions(buf: &[u8], step: usize) -> Option<String> {
    if step == 0 {
        return try_extension(buf);
    }

    let mut offset = 0;
    while buf.len().saturating_sub(offset) >= MIN_EXTENSION_LEN {
        if let Some(found) = try_extension(&buf[offset..]) {
            return Some(found);
        }
        offset += step;
    }
    None
}

/// Decode the extensions trailing an ICMP error, using the RFC 4884 length
/// octet to find them. Legacy messages without the octet are scanned from
/// the 128-byte mark.
pub fn extensions_for(icmp: &IcmpMessage<'_>, is_ipv6: bool) -> Option<String> {
    let words = icmp.original_datagram_words(is_ipv6) as usize;
    if words > 0 {
        let unit = if is_ipv6 { 8 } else { 4 };
        let region = icmp.payload.get(words * unit..)?;
        decode_extensions(region, 0)
    } else {
        let region = icmp.payload.get(LEGACY_ORIGINAL_DATAGRAM_LEN..)?;
        decode_extensions(region, LEGACY_SCAN_STEP)
    }
}

fn try_extension(buf: &[u8]) -> Option<String> {
    if buf.len() < MIN_EXTENSION_LEN {
        return None;
    }

    let version = buf[0] >> 4;
    if version != EXTENSION_VERSION {
        debug!(version, "extension header version mismatch");
        return None;
    }

    let checksum = u16::from_be_bytes([buf[2], buf[3]]);
    if checksum != 0 && !verify(buf) {
        debug!(checksum, len = buf.len(), "extension checksum mismatch");
        return None;
    }

    let mut out = String::new();
    let mut rest = &buf[EXTENSION_HEADER_LEN..];

    while rest.len() >= OBJECT_HEADER_LEN {
        let obj_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let class = rest[2];
        let ctype = rest[3];

        if obj_len < OBJECT_HEADER_LEN || obj_len > rest.len() {
            debug!(obj_len, remaining = rest.len(), "extension object length out of range");
            return None;
        }
        let data = &rest[OBJECT_HEADER_LEN..obj_len];
        if data.len() % 4 != 0 {
            debug!(obj_len, "extension object not 32-bit aligned");
            return None;
        }

        if !out.is_empty() {
            out.push(';');
        }

        if class == MPLS_CLASS && ctype == MPLS_CTYPE && !data.is_empty() {
            write_mpls(&mut out, data);
        } else if let Some(iface) = (class == INTERFACE_INFO_CLASS)
            .then(|| interface_info(ctype, data))
            .flatten()
        {
            out.push_str(&iface);
        } else {
            write_raw_object(&mut out, class, ctype, data);
        }

        rest = &rest[obj_len..];
    }

    if !rest.is_empty() {
        debug!(trailing = rest.len(), "extension objects do not fill region");
        return None;
    }

    Some(out)
}

fn words(data: &[u8]) -> impl Iterator<Item = u32> + '_ {
    data.chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
}

fn write_mpls(out: &mut String, data: &[u8]) {
    out.push_str("MPLS:");
    for (i, word) in words(data).enumerate() {
        if i > 0 {
            out.push('/');
        }
        let _ = write!(out, "{}", MplsLabel::from_word(word));
    }
}

fn write_raw_object(out: &mut String, class: u8, ctype: u8, data: &[u8]) {
    let _ = write!(out, "{}/{}:", class, ctype);
    for (i, word) in words(data).enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{:08x}", word);
    }
}

/// RFC 5837 Interface Information object. None sends the object to the
/// raw fallback.
fn interface_info(ctype: u8, data: &[u8]) -> Option<String> {
    if data.len() > INTERFACE_INFO_MAX {
        return None;
    }

    // Zero-padded copy so each sub-field read stays in bounds; overruns are
    // caught against the real length at the end.
    let mut tmp = [0u8; INTERFACE_INFO_MAX];
    tmp[..data.len()].copy_from_slice(data);
    let word_at = |pos: usize| u32::from_be_bytes([tmp[pos], tmp[pos + 1], tmp[pos + 2], tmp[pos + 3]]);

    let mut fields: Vec<String> = Vec::new();
    let mut pos = 0;

    if ctype & 0x08 != 0 {
        fields.push(word_at(pos).to_string());
        pos += 4;
    }

    if ctype & 0x04 != 0 {
        let afi = word_at(pos) >> 16;
        pos += 4;
        match afi {
            1 => {
                let addr = Ipv4Addr::new(tmp[pos], tmp[pos + 1], tmp[pos + 2], tmp[pos + 3]);
                fields.push(addr.to_string());
                pos += 4;
            }
            2 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&tmp[pos..pos + 16]);
                fields.push(Ipv6Addr::from(octets).to_string());
                pos += 16;
            }
            _ => return None,
        }
    }

    if ctype & 0x02 != 0 {
        let len = tmp[pos] as usize;
        if len == 0 || len % 4 != 0 || len > INTERFACE_NAME_MAX {
            return None;
        }
        let mut name = String::with_capacity(len + 2);
        name.push('"');
        for &ch in tmp[pos + 1..pos + len].iter().take_while(|&&ch| ch != 0) {
            if ch.is_ascii_graphic() && ch != b'%' && ch != b'"' {
                name.push(ch as char);
            } else {
                let _ = write!(name, "%{:02X}", ch);
            }
        }
        name.push('"');
        fields.push(name);
        pos += len;
    }

    if ctype & 0x01 != 0 {
        fields.push(format!("mtu={}", word_at(pos)));
        pos += 4;
    }

    if pos > data.len() {
        return None;
    }

    let role = ROLES[((ctype >> 6) & 0x03) as usize];
    Some(format!("{}:{}", role, fields.join(",")))
}
