//! Per-probe results for one trace run.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::warn;

use crate::icmp::Classification;
use crate::probe::rtt_ms;

/// One probe slot: what was sent and what came back
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HopProbe {
    pub ttl: u8,
    pub probe_idx: u16,
    /// Correlation key (the destination port for UDP probes)
    pub seq: u32,
    /// Seconds, 0 = not sent yet
    pub send_time: f64,
    /// Seconds, 0 = no reply
    pub recv_time: f64,
    pub reply_addr: Option<IpAddr>,
    pub annotation: Option<String>,
    pub extensions: Option<String>,
    /// This reply came from the destination or ends the trace
    pub final_hop: bool,
    /// No further events change this probe
    pub done: bool,
}

/// Render/export view of a finished probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub ttl: u8,
    pub probe_idx: u16,
    pub addr: Option<IpAddr>,
    pub rtt_ms: Option<f64>,
    pub err: Option<String>,
    pub extensions: Option<String>,
}

impl ProbeOutcome {
    pub fn replied(&self) -> bool {
        self.addr.is_some()
    }
}

impl HopProbe {
    pub fn new(ttl: u8, probe_idx: u16) -> Self {
        Self {
            ttl,
            probe_idx,
            ..Default::default()
        }
    }

    /// Fold an ICMP classification into the probe
    pub fn apply_classification(&mut self, class: Classification) {
        self.final_hop = class.final_hop;
        if class.annotation.is_some() {
            self.annotation = class.annotation;
        }
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        rtt_ms(self.send_time, self.recv_time)
    }

    pub fn outcome(&self) -> ProbeOutcome {
        ProbeOutcome {
            ttl: self.ttl,
            probe_idx: self.probe_idx,
            addr: self.reply_addr,
            rtt_ms: self.reply_addr.and(self.rtt_ms()),
            err: self.annotation.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

/// Lookup-by-sequence table that both receive paths update
pub trait ProbeRegistry {
    fn lookup(&mut self, seq: u32) -> Option<&mut HopProbe>;

    fn mark_done(&mut self, seq: u32);
}

/// In-memory registry, laid out TTL-major:
/// slot = (ttl - first_hop) * probes_per_ttl + probe_idx
#[derive(Debug, Clone)]
pub struct ProbeTable {
    first_hop: u8,
    probes_per_ttl: u16,
    probes: Vec<HopProbe>,
    by_seq: HashMap<u32, usize>,
}

impl ProbeTable {
    pub fn new(first_hop: u8, max_ttl: u8, probes_per_ttl: u16) -> Self {
        let first_hop = first_hop.max(1);
        let probes_per_ttl = probes_per_ttl.max(1);
        let probes = (first_hop..=max_ttl)
            .flat_map(|ttl| (0..probes_per_ttl).map(move |idx| HopProbe::new(ttl, idx)))
            .collect();

        Self {
            first_hop,
            probes_per_ttl,
            probes,
            by_seq: HashMap::new(),
        }
    }

    fn slot(&self, ttl: u8, probe_idx: u16) -> Option<usize> {
        if ttl < self.first_hop || probe_idx >= self.probes_per_ttl {
            return None;
        }
        let slot = (ttl - self.first_hop) as usize * self.probes_per_ttl as usize
            + probe_idx as usize;
        (slot < self.probes.len()).then_some(slot)
    }

    /// Record that (ttl, probe_idx) went out under key `seq` at `send_time`.
    /// Returns false when the pair is outside the table.
    pub fn register(&mut self, ttl: u8, probe_idx: u16, seq: u32, send_time: f64) -> bool {
        let Some(slot) = self.slot(ttl, probe_idx) else {
            warn!(ttl, probe_idx, "probe outside registry bounds");
            return false;
        };

        if let Some(previous) = self.by_seq.insert(seq, slot)
            && previous != slot
        {
            warn!(seq, previous, slot, "sequence key reused, older probe unreachable");
        }

        let probe = &mut self.probes[slot];
        probe.seq = seq;
        probe.send_time = send_time;
        true
    }

    pub fn get(&self, ttl: u8, probe_idx: u16) -> Option<&HopProbe> {
        self.probes.get(self.slot(ttl, probe_idx)?)
    }

    /// Probes sent at `ttl`, in index order
    pub fn hop(&self, ttl: u8) -> &[HopProbe] {
        match self.slot(ttl, 0) {
            Some(start) => {
                let end = (start + self.probes_per_ttl as usize).min(self.probes.len());
                &self.probes[start..end]
            }
            None => &[],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HopProbe> {
        self.probes.iter()
    }

    /// Lowest TTL with a probe that reached the end of the path
    pub fn final_ttl(&self) -> Option<u8> {
        self.probes.iter().find(|p| p.final_hop).map(|p| p.ttl)
    }

    pub fn first_hop(&self) -> u8 {
        self.first_hop
    }

    pub fn probes_per_ttl(&self) -> u16 {
        self.probes_per_ttl
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl ProbeRegistry for ProbeTable {
    fn lookup(&mut self, seq: u32) -> Option<&mut HopProbe> {
        let slot = *self.by_seq.get(&seq)?;
        self.probes.get_mut(slot)
    }

    fn mark_done(&mut self, seq: u32) {
        if let Some(probe) = self.lookup(seq) {
            probe.done = true;
        }
    }
}
