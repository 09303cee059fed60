//! Identifiers and protocol constants for the hopmesh network.
//!
//! This crate provides the types shared by every other hopmesh crate:
//!
//! - **Node identity**: [`NodeId`], a 16-byte random identifier with a
//!   reversible base58 string form
//! - **Constants**: wire limits and protocol timing
//!
//! # Example
//!
//! ```
//! use hopmesh_types::NodeId;
//!
//! let id = NodeId::generate();
//! let encoded = id.encode();
//! assert_eq!(NodeId::decode(&encoded).unwrap(), id);
//! ```

pub mod constants;
mod error;
mod id;
mod serde_impl;

pub use error::IdError;
pub use id::{NodeId, NODE_ID_LEN};
