//! Network configuration.
//!
//! This module defines configuration options for peer connections, the
//! topology and the network facade.

use hopmesh_types::constants::{
    BROADCAST_DELAY_MS, FAILURE_DETECTOR_MIN_STD_DEV_MS, FAILURE_DETECTOR_THRESHOLD,
    FAILURE_DETECTOR_WINDOW, LATENCY_GOSSIP_INTERVAL_MS, LATENCY_SAMPLES, MAX_PING_GAP_MS,
    MAX_START_JITTER_MS, MESSAGE_TIMEOUT_MS, NEGOTIATION_TIMEOUT_MS, PING_CHECK_INTERVAL_MS,
    PING_INTERVAL_MS, SUPPORTED_PROTOCOL_VERSIONS,
};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AnonymousAuth, AuthProvider};

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Time allowed for each negotiation step.
    ///
    /// Default: 5 seconds.
    pub negotiation_timeout: Duration,

    /// Interval between pings once active.
    ///
    /// Default: 30 seconds.
    pub ping_interval: Duration,

    /// Interval of the liveness check.
    ///
    /// Default: 5 seconds.
    pub ping_check_interval: Duration,

    /// Longest tolerated gap without ping traffic.
    ///
    /// Default: 90 seconds.
    pub max_ping_gap: Duration,

    /// Number of round-trip samples averaged into the latency.
    ///
    /// Default: 6.
    pub latency_samples: usize,

    /// Phi threshold of the failure detector.
    ///
    /// Default: 8.0.
    pub failure_threshold: f64,

    /// Heartbeat intervals kept by the failure detector.
    ///
    /// Default: 100.
    pub failure_window: usize,

    /// Minimum standard deviation assumed by the failure detector.
    ///
    /// Default: 500 ms.
    pub failure_min_std_dev: Duration,

    /// Protocol versions offered during negotiation.
    pub protocol_versions: Vec<u32>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_millis(NEGOTIATION_TIMEOUT_MS),
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            ping_check_interval: Duration::from_millis(PING_CHECK_INTERVAL_MS),
            max_ping_gap: Duration::from_millis(MAX_PING_GAP_MS),
            latency_samples: LATENCY_SAMPLES,
            failure_threshold: FAILURE_DETECTOR_THRESHOLD,
            failure_window: FAILURE_DETECTOR_WINDOW,
            failure_min_std_dev: Duration::from_secs_f64(FAILURE_DETECTOR_MIN_STD_DEV_MS / 1000.0),
            protocol_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        }
    }
}

impl PeerConfig {
    /// Set the negotiation step timeout.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set the ping interval. The maximum ping gap follows at three intervals.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self.max_ping_gap = interval * 3;
        self
    }

    /// Set the liveness check interval.
    pub fn with_ping_check_interval(mut self, interval: Duration) -> Self {
        self.ping_check_interval = interval;
        self
    }

    /// Set the offered protocol versions.
    pub fn with_protocol_versions(mut self, versions: Vec<u32>) -> Self {
        self.protocol_versions = versions;
        self
    }
}

/// Topology, gossip and messaging settings.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Time a pending send waits for an ack or reject.
    ///
    /// Default: 5 seconds.
    pub message_timeout: Duration,

    /// Debounce delay of routing broadcasts.
    ///
    /// Default: 100 ms.
    pub broadcast_delay: Duration,

    /// Interval of latency gossip to a random peer.
    ///
    /// Default: 30 seconds.
    pub latency_gossip_interval: Duration,

    /// Upper bound of the random delay before the first latency gossip.
    ///
    /// Default: 1 second.
    pub max_start_jitter: Duration,

    /// Endpoints never gossip routing information and never relay data, so
    /// only their direct neighbors reach them.
    ///
    /// Default: false.
    pub endpoint: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_millis(MESSAGE_TIMEOUT_MS),
            broadcast_delay: Duration::from_millis(BROADCAST_DELAY_MS),
            latency_gossip_interval: Duration::from_millis(LATENCY_GOSSIP_INTERVAL_MS),
            max_start_jitter: Duration::from_millis(MAX_START_JITTER_MS),
            endpoint: false,
        }
    }
}

/// Configuration for the network facade.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Name of the network, passed to transports for discovery.
    ///
    /// Default: "hopmesh".
    pub name: String,

    /// Auth providers, tried in order by client connections.
    ///
    /// Default: anonymous only.
    pub auth: Vec<Arc<dyn AuthProvider>>,

    /// Capabilities announced during negotiation.
    pub capabilities: Vec<String>,

    /// Per-connection settings.
    pub peer: PeerConfig,

    /// Topology settings.
    pub topology: TopologyConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "hopmesh".to_string(),
            auth: vec![Arc::new(AnonymousAuth)],
            capabilities: Vec::new(),
            peer: PeerConfig::default(),
            topology: TopologyConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the network name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark this node as an endpoint.
    pub fn with_endpoint(mut self, endpoint: bool) -> Self {
        self.topology.endpoint = endpoint;
        self
    }

    /// Replace the auth providers.
    pub fn with_auth(mut self, auth: Vec<Arc<dyn AuthProvider>>) -> Self {
        self.auth = auth;
        self
    }

    /// Set the announced capabilities.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the per-connection settings.
    pub fn with_peer_config(mut self, peer: PeerConfig) -> Self {
        self.peer = peer;
        self
    }

    /// Set the topology settings.
    pub fn with_topology_config(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    /// Set the pending send timeout.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.topology.message_timeout = timeout;
        self
    }
}
