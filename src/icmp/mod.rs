//! ICMP reply interpretation: classification, extensions, checksum.

pub mod checksum;
pub mod classify;
pub mod extension;

pub use checksum::{internet_checksum, ones_complement_sum, verify};
pub use classify::{Classification, classify};
pub use extension::{MplsLabel, decode_extensions, extensions_for};
