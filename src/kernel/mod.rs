//! Kernel telemetry: probe events from the ring buffer and per-hop RTT
//! histograms. Loading and attaching the kernel program is left to the
//! caller; this module only decodes what it produces.

pub mod event;
pub mod histogram;

pub use event::*;
pub use histogram::*;
