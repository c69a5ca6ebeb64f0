//! Traceroute correlation core.
//!
//! Decodes what comes back from the network (ICMP errors, raw frames,
//! socket error-queue control data, kernel telemetry records), matches it
//! to the probes that were sent, paces new probes, and renders the results.
//! Nothing here opens a socket; callers own I/O and the clock.

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod icmp;
pub mod kernel;
pub mod probe;
pub mod state;
pub mod wire;
