//! Mesh networking for hopmesh.
//!
//! Nodes connect over pluggable transports and exchange messages. Nodes that
//! are not directly connected reach each other through peers acting as
//! routers. This crate provides:
//!
//! - **Peers**: a negotiation state machine per connection (Hello, Select,
//!   Auth, Begin), ping/pong liveness with an accrual failure detector, and
//!   latency estimation
//! - **Auth**: pluggable providers; anonymous and shared-secret included
//! - **Topology**: a weighted graph of known nodes kept in sync by gossip,
//!   with Dijkstra shortest paths and debounced routing broadcasts
//! - **Messaging**: point-to-point delivery with per-hop ack/reject, loop
//!   detection and timeouts
//! - **Network**: a facade owning identity, topology and transports
//!
//! # Overview
//!
//! ```text
//!  Network ──▶ Topology actor ──▶ Peer tasks ──▶ byte streams
//!     ▲             │                               ▲
//!     └── events ◀──┘             Transports ───────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hopmesh_net::{Network, NetworkConfig, NetworkEvent, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = Network::new(NetworkConfig::default());
//!     network
//!         .add_transport(TcpTransport::new().with_peer("10.0.0.2:7000".parse()?))
//!         .await?;
//!     network.join().await?;
//!
//!     let mut events = network.subscribe();
//!     loop {
//!         match events.recv().await? {
//!             NetworkEvent::Message(message) => {
//!                 let text: String = message.decode()?;
//!                 println!("{}: {}", message.source, text);
//!             }
//!             event => println!("{:?}", event),
//!         }
//!     }
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod network;
pub mod peer;
pub mod topology;
pub mod transport;

mod timer;

// Re-export main types at crate root

// Configuration
pub use config::{NetworkConfig, PeerConfig, TopologyConfig};

// Error types
pub use error::{NetworkError, NetworkResult};

// Event types
pub use event::{NetworkEvent, NodeEvent, TopologyEvent};

// Network facade
pub use message::Message;
pub use network::{Network, Node};

// Peers and auth
pub use auth::{AnonymousAuth, AuthContext, AuthProvider, SharedSecretAuth};
pub use peer::{DisconnectReason, Peer, PeerConnection, PeerEvent, PeerKey, PeerOptions, PeerState, Role};

// Topology
pub use topology::Topology;

// Transports
pub use transport::{PeerConnector, TcpTransport, Transport, TransportOptions};
