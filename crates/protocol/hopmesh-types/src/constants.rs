//! Protocol constants.
//!
//! These constants define wire limits, negotiation and liveness timing, and
//! gossip/messaging timing. Configuration structs in `hopmesh-net` take their
//! defaults from here.

// =============================================================================
// Protocol Version
// =============================================================================

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Protocol versions this implementation can speak, highest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[PROTOCOL_VERSION];

// =============================================================================
// Wire Limits
// =============================================================================

/// Maximum framed message size: 8 MB
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// =============================================================================
// Negotiation & Liveness
// =============================================================================

/// Negotiation step timeout: 5 seconds (in milliseconds)
pub const NEGOTIATION_TIMEOUT_MS: u64 = 5_000;

/// Interval between pings on an active connection: 30 seconds (in milliseconds)
pub const PING_INTERVAL_MS: u64 = 30_000;

/// Interval of the liveness checker: 5 seconds (in milliseconds)
pub const PING_CHECK_INTERVAL_MS: u64 = 5_000;

/// Longest tolerated gap without ping traffic: 3 ping intervals (in milliseconds)
pub const MAX_PING_GAP_MS: u64 = 3 * PING_INTERVAL_MS;

/// Number of round-trip samples averaged into a peer's latency
pub const LATENCY_SAMPLES: usize = 6;

/// Phi value above which the failure detector reports the peer as failed
pub const FAILURE_DETECTOR_THRESHOLD: f64 = 8.0;

/// Number of heartbeat intervals kept by the failure detector
pub const FAILURE_DETECTOR_WINDOW: usize = 100;

/// Minimum standard deviation assumed by the failure detector (in milliseconds)
pub const FAILURE_DETECTOR_MIN_STD_DEV_MS: f64 = 500.0;

// =============================================================================
// Topology & Messaging
// =============================================================================

/// Pending send timeout: 5 seconds (in milliseconds)
pub const MESSAGE_TIMEOUT_MS: u64 = 5_000;

/// Debounce delay before a routing broadcast: 100 milliseconds
pub const BROADCAST_DELAY_MS: u64 = 100;

/// Interval of latency gossip to a random peer: 30 seconds (in milliseconds)
pub const LATENCY_GOSSIP_INTERVAL_MS: u64 = 30_000;

/// Upper bound of the random delay before the first latency gossip (in milliseconds)
pub const MAX_START_JITTER_MS: u64 = 1_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_gap_is_three_intervals() {
        assert_eq!(MAX_PING_GAP_MS, 90_000);
    }

    #[test]
    fn test_current_version_is_supported() {
        assert!(SUPPORTED_PROTOCOL_VERSIONS.contains(&PROTOCOL_VERSION));
    }
}
