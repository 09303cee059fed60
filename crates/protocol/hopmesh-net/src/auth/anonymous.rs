use async_trait::async_trait;

use super::{
    AuthContext, AuthProvider, ClientAuthFlow, ClientAuthReply, ServerAuthFlow, ServerAuthReply,
};
use crate::error::NetworkResult;

/// Accepts every client without exchanging credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuth;

impl AnonymousAuth {
    /// Method id of anonymous authentication.
    pub const ID: &'static str = "anonymous";
}

struct AnonymousFlow;

#[async_trait]
impl ClientAuthFlow for AnonymousFlow {
    async fn initial_message(&mut self) -> NetworkResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn receive_data(&mut self, _data: &[u8]) -> NetworkResult<ClientAuthReply> {
        // the server never asks for more
        Ok(ClientAuthReply::Reject)
    }
}

#[async_trait]
impl ServerAuthFlow for AnonymousFlow {
    async fn receive_initial(&mut self, _data: &[u8]) -> NetworkResult<ServerAuthReply> {
        Ok(ServerAuthReply::Ok)
    }

    async fn receive_data(&mut self, _data: &[u8]) -> NetworkResult<ServerAuthReply> {
        Ok(ServerAuthReply::Reject)
    }
}

impl AuthProvider for AnonymousAuth {
    fn id(&self) -> &str {
        Self::ID
    }

    fn create_client_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ClientAuthFlow>> {
        Some(Box::new(AnonymousFlow))
    }

    fn create_server_flow(&self, _ctx: &AuthContext) -> Option<Box<dyn ServerAuthFlow>> {
        Some(Box::new(AnonymousFlow))
    }
}
