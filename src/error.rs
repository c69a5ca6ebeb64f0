//! Error types for wire decoding and configuration.

use thiserror::Error;

/// Broad class of a decode failure, used by callers to decide whether to
/// count a packet as garbage or as foreign traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Insufficient length, inconsistent declared lengths, misaligned fields
    MalformedInput,
    /// Unexpected IP version or unsupported encapsulation
    ProtocolMismatch,
    /// IPv6 extension chain longer than we are willing to walk
    LoopDetected,
}

/// Failure to decode an untrusted buffer.
///
/// Every variant is local to one packet or record; none is fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("{layer}: truncated, expected at least {expected} bytes, got {actual}")]
    Truncated {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{layer}: invalid format: {reason}")]
    InvalidFormat {
        layer: &'static str,
        reason: &'static str,
    },

    #[error("{layer}: unsupported version {version}")]
    UnsupportedVersion { layer: &'static str, version: u8 },

    #[error("IPv6 extension header chain exceeds {limit} headers")]
    LoopDetected { limit: usize },

    #[error("malformed control record: need {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },
}

impl WireError {
    pub(crate) fn truncated(layer: &'static str, expected: usize, actual: usize) -> Self {
        Self::Truncated {
            layer,
            expected,
            actual,
        }
    }

    pub(crate) fn invalid(layer: &'static str, reason: &'static str) -> Self {
        Self::InvalidFormat { layer, reason }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Truncated { .. } | Self::InvalidFormat { .. } | Self::MalformedRecord { .. } => {
                ErrorClass::MalformedInput
            }
            Self::UnsupportedVersion { .. } => ErrorClass::ProtocolMismatch,
            Self::LoopDetected { .. } => ErrorClass::LoopDetected,
        }
    }

    /// Always true: a wire error is local to one packet or record.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// True when the input itself is broken (as opposed to simply not ours).
    /// Loop detection counts as malformed: no honest sender builds such a chain.
    pub fn is_malformed(&self) -> bool {
        !matches!(self.class(), ErrorClass::ProtocolMismatch)
    }
}

/// Rejected trace configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max TTL must be between 1 and 255, got {0}")]
    MaxTtl(u16),

    #[error("first hop must be between 1 and max TTL ({max_ttl}), got {first_hop}")]
    FirstHop { first_hop: u8, max_ttl: u8 },

    #[error("wait time must be in (0, 86400] seconds, got {0}")]
    Wait(f64),

    #[error("probes per hop must be between 1 and 16, got {0}")]
    ProbesPerTtl(u16),

    #[error("rate and burst must be non-negative (rate={rate}, burst={burst})")]
    RateLimit { rate: f64, burst: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            WireError::truncated("udp", 8, 3).class(),
            ErrorClass::MalformedInput
        );
        assert_eq!(
            WireError::UnsupportedVersion {
                layer: "ipv4",
                version: 6
            }
            .class(),
            ErrorClass::ProtocolMismatch
        );
        assert!(WireError::LoopDetected { limit: 10 }.is_malformed());
        assert!(!WireError::UnsupportedVersion {
            layer: "ipv6",
            version: 4
        }
        .is_malformed());
    }

    #[test]
    fn test_error_display() {
        let err = WireError::truncated("tcp", 20, 12);
        assert_eq!(
            err.to_string(),
            "tcp: truncated, expected at least 20 bytes, got 12"
        );
    }
}
