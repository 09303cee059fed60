//! Helper functions for integration tests.

use hopmesh_net::{Network, NetworkConfig, TopologyConfig};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use crate::MemoryHub;

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Network configuration with no start jitter.
pub fn test_config() -> NetworkConfig {
    NetworkConfig::default().with_topology_config(TopologyConfig {
        max_start_jitter: Duration::ZERO,
        ..TopologyConfig::default()
    })
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
///
/// Returns whether the condition held.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fire pending routing broadcasts on every network a few times so gossip
/// triggered by earlier rounds is flushed too.
pub async fn settle(networks: &[Network]) {
    for _ in 0..8 {
        for network in networks {
            let _ = network.topology().consolidate().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// `n` joined networks sharing one hub, sorted by id, not yet linked.
pub async fn joined_networks(hub: &MemoryHub, n: usize, config: NetworkConfig) -> Vec<Network> {
    let mut networks = Vec::with_capacity(n);
    for _ in 0..n {
        let network = Network::new(config.clone());
        if network.add_transport(hub.transport()).await.is_ok() && network.join().await.is_ok() {
            networks.push(network);
        }
    }
    networks.sort_by_key(|network| network.id());
    networks
}

/// Ids of the nodes `network` can currently reach.
pub async fn visible(network: &Network) -> Vec<hopmesh_types::NodeId> {
    network.topology().nodes().await.unwrap_or_default()
}
