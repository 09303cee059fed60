//! Shared test utilities for hopmesh.
//!
//! - [`MemoryHub`] connects networks in one process through in-memory byte
//!   streams, with or without negotiation, and can cut links again.
//! - [`helpers`] sets up tracing, builds fast test configurations and polls
//!   for conditions instead of sleeping.

pub mod helpers;
pub mod memory_transport;

pub use helpers::*;
pub use memory_transport::{MemoryHub, MemoryTransport};
