use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::PlanArgs;
use crate::error::ConfigError;
use crate::probe::{
    Correlator, DEFAULT_UDP_PAYLOAD, FlowIdentity, IpProtocol, Probe, ProbeIdentity, derive_ipv6,
    derive_tcp, derive_udp,
};
use crate::state::{Pacer, ProbeScheduler, ProbeTable, TokenBucket};

/// Upper bound on the per-probe wait
pub const MAX_WAIT_SECS: f64 = 86_400.0;
/// Upper bound on probes sent per TTL
pub const MAX_PROBES_PER_TTL: u16 = 16;

/// Settings for one trace run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// First TTL probed
    pub first_hop: u8,
    /// Last TTL probed. Wider than a TTL so out-of-range values can be reported.
    pub max_ttl: u16,
    pub probes_per_ttl: u16,
    /// How long to wait for each reply
    #[serde(with = "duration_serde")]
    pub wait: Duration,
    pub protocol: IpProtocol,
    /// Destination port of the first UDP probe, or the fixed TCP port
    pub base_port: u16,
    /// 0 = let the kernel pick
    pub src_port: u16,
    /// Base IPv6 flow label
    pub flow_label: u32,
    /// Probes per second, 0 = unlimited
    pub rate: f64,
    /// Probes that may go out back to back; 0 with a rate set means 1
    pub burst: f64,
    /// Outstanding probes tracked for reply matching (None = one per probe)
    pub correlator_capacity: Option<usize>,
    /// Total run time from the first send
    #[serde(with = "opt_duration_serde")]
    pub deadline: Option<Duration>,
    /// UDP payload bytes
    pub payload_len: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            first_hop: 1,
            max_ttl: 30,
            probes_per_ttl: 3,
            wait: Duration::from_secs(5),
            protocol: IpProtocol::Udp,
            base_port: 33434,
            src_port: 0,
            flow_label: 0,
            rate: 0.0,
            burst: 0.0,
            correlator_capacity: None,
            deadline: None,
            payload_len: DEFAULT_UDP_PAYLOAD,
        }
    }
}

impl From<&PlanArgs> for TraceConfig {
    fn from(args: &PlanArgs) -> Self {
        Self::default().with_overrides(args)
    }
}

impl TraceConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply every option set on the command line
    pub fn with_overrides(mut self, args: &PlanArgs) -> Self {
        if let Some(first_hop) = args.first_hop {
            self.first_hop = first_hop;
        }
        if let Some(max_ttl) = args.max_ttl {
            self.max_ttl = max_ttl;
        }
        if let Some(queries) = args.queries {
            self.probes_per_ttl = queries;
        }
        if let Some(wait) = args.wait {
            // Out-of-range values are rejected by validate()
            self.wait = Duration::try_from_secs_f64(wait).unwrap_or(Duration::ZERO);
        }
        if let Some(protocol) = args.protocol {
            self.protocol = protocol;
        }
        if let Some(port) = args.port {
            self.base_port = port;
        }
        if let Some(src_port) = args.src_port {
            self.src_port = src_port;
        }
        if let Some(flow_label) = args.flow_label {
            self.flow_label = flow_label;
        }
        if let Some(rate) = args.rate {
            self.rate = rate;
        }
        if let Some(burst) = args.burst {
            self.burst = burst;
        }
        if let Some(deadline) = args.deadline {
            self.deadline = Duration::try_from_secs_f64(deadline)
                .ok()
                .filter(|d| !d.is_zero());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=255).contains(&self.max_ttl) {
            return Err(ConfigError::MaxTtl(self.max_ttl));
        }
        let max_ttl = self.max_ttl as u8;
        if self.first_hop == 0 || self.first_hop > max_ttl {
            return Err(ConfigError::FirstHop {
                first_hop: self.first_hop,
                max_ttl,
            });
        }
        let wait = self.wait.as_secs_f64();
        if wait <= 0.0 || wait > MAX_WAIT_SECS {
            return Err(ConfigError::Wait(wait));
        }
        if !(1..=MAX_PROBES_PER_TTL).contains(&self.probes_per_ttl) {
            return Err(ConfigError::ProbesPerTtl(self.probes_per_ttl));
        }
        let bad = |v: f64| !v.is_finite() || v < 0.0;
        if bad(self.rate) || bad(self.burst) {
            return Err(ConfigError::RateLimit {
                rate: self.rate,
                burst: self.burst,
            });
        }
        Ok(())
    }

    fn last_ttl(&self) -> u8 {
        self.max_ttl.min(255) as u8
    }

    /// Sequencer for a run starting at `start` (seconds)
    pub fn scheduler(&self, start: f64) -> ProbeScheduler {
        let deadline = self.deadline.map(|d| start + d.as_secs_f64());
        ProbeScheduler::new(self.last_ttl(), self.probes_per_ttl, deadline)
            .starting_at(self.first_hop)
    }

    /// None when no rate is configured
    pub fn token_bucket(&self, start: f64) -> Option<TokenBucket> {
        (self.rate > 0.0).then(|| TokenBucket::new(self.rate, self.burst.max(1.0), start))
    }

    pub fn pacer(&self, start: f64) -> Pacer {
        Pacer::new(self.scheduler(start), self.token_bucket(start))
    }

    pub fn probe_table(&self) -> ProbeTable {
        ProbeTable::new(self.first_hop, self.last_ttl(), self.probes_per_ttl)
    }

    pub fn correlator_capacity(&self) -> usize {
        self.correlator_capacity
            .unwrap_or(self.last_ttl() as usize * self.probes_per_ttl as usize)
            .max(1)
    }

    pub fn correlator(&self) -> Correlator {
        Correlator::new(self.correlator_capacity())
    }

    /// Header values for the probe with global send sequence `seq`
    pub fn flow_identity(&self, seq: u32, ipv6: bool) -> FlowIdentity {
        let mut flow = match self.protocol {
            IpProtocol::Udp => derive_udp(self.base_port, self.src_port, seq),
            IpProtocol::Tcp => derive_tcp(self.base_port, self.src_port, seq),
            IpProtocol::Icmp => FlowIdentity {
                sequence: seq,
                ..Default::default()
            },
        };
        if ipv6 {
            flow.flow_label = derive_ipv6(self.flow_label, seq).flow_label;
        }
        flow
    }

    /// Probe for `dst` at `ttl`, carrying the identity of sequence `seq`
    pub fn build_probe(&self, dst: IpAddr, ttl: u8, seq: u32) -> Probe {
        let flow = self.flow_identity(seq, dst.is_ipv6());
        let mut probe = match self.protocol {
            IpProtocol::Udp => {
                Probe::udp(dst, flow.src_port, flow.dst_port, ttl, self.payload_len)
            }
            IpProtocol::Tcp => Probe::tcp(dst, flow.src_port, flow.dst_port, flow.sequence, ttl),
            IpProtocol::Icmp => Probe {
                identity: ProbeIdentity {
                    protocol: IpProtocol::Icmp,
                    sequence: flow.sequence,
                    ttl,
                    ..Default::default()
                },
                dst_addr: SocketAddr::new(dst, 0),
                src_addr: None,
                payload: Vec::new(),
            },
        };
        probe.identity.flow_id = flow.flow_label;
        probe
    }

    /// Bytes on the wire for one probe, IP header included
    pub fn packet_len(&self, ipv6: bool) -> usize {
        let ip = if ipv6 { 40 } else { 20 };
        match self.protocol {
            IpProtocol::Udp => ip + 8 + self.payload_len,
            IpProtocol::Tcp => ip + 20,
            IpProtocol::Icmp => ip + 8,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    /// 0 means no deadline
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(secs) if secs == 0.0 => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
