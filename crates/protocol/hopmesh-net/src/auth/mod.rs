//! Pluggable connection authentication.
//!
//! An [`AuthProvider`] is identified by a string id and may offer a client
//! flow, a server flow, or both. During negotiation the client picks the
//! first configured provider offering a client flow and sends its id with
//! the initial auth data; the server looks up the provider with the same id
//! and drives its server flow. Flows exchange opaque byte buffers until the
//! server answers Ok or Reject.
//!
//! [`AuthContext`] carries optional public security material of each side
//! (for instance a certificate hash) so providers can bind their exchange to
//! the underlying channel.

mod anonymous;
mod shared_secret;

pub use anonymous::AnonymousAuth;
pub use shared_secret::SharedSecretAuth;

use async_trait::async_trait;
use std::fmt;

use crate::error::NetworkResult;

/// Channel binding material available to auth flows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Public security data of the local side.
    pub local_public_security: Option<Vec<u8>>,
    /// Public security data of the remote side.
    pub remote_public_security: Option<Vec<u8>>,
}

/// Outcome of a server flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAuthReply {
    /// Client is authenticated.
    Ok,
    /// Client is rejected; it may try another provider.
    Reject,
    /// Another round is needed; send these bytes to the client.
    Data(Vec<u8>),
}

/// Outcome of a client flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuthReply {
    /// Client gives up on the exchange.
    Reject,
    /// Send these bytes to the server.
    Data(Vec<u8>),
}

/// Client side of one authentication attempt.
#[async_trait]
pub trait ClientAuthFlow: Send {
    /// Data sent along with the Auth message.
    async fn initial_message(&mut self) -> NetworkResult<Vec<u8>>;

    /// Handle an AuthData round from the server.
    async fn receive_data(&mut self, data: &[u8]) -> NetworkResult<ClientAuthReply>;

    /// Release resources held by the flow.
    async fn destroy(&mut self) {}
}

/// Server side of one authentication attempt.
#[async_trait]
pub trait ServerAuthFlow: Send {
    /// Handle the data carried by the Auth message.
    async fn receive_initial(&mut self, data: &[u8]) -> NetworkResult<ServerAuthReply>;

    /// Handle an AuthData round from the client.
    async fn receive_data(&mut self, data: &[u8]) -> NetworkResult<ServerAuthReply>;

    /// Release resources held by the flow.
    async fn destroy(&mut self) {}
}

/// Factory of auth flows for one authentication method.
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Method id sent on the wire.
    fn id(&self) -> &str;

    /// Create a client flow, or `None` if this provider cannot authenticate
    /// outgoing connections.
    fn create_client_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ClientAuthFlow>> {
        None
    }

    /// Create a server flow, or `None` if this provider cannot authenticate
    /// incoming connections.
    fn create_server_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ServerAuthFlow>> {
        None
    }
}
