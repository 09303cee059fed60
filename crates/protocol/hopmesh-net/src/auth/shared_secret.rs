//! Challenge/response authentication with a pre-shared secret.
//!
//! ```text
//! client                         server
//!   Auth { "shared-secret", [] } ->
//!                              <- AuthData { challenge: 32 random bytes }
//!   AuthData { response }        ->
//!                              <- Ok | Reject
//! ```
//!
//! `response = SHA-256(domain || secret || challenge || server_security || client_security)`,
//! every variable-length field prefixed with its length.

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use super::{
    AuthContext, AuthProvider, ClientAuthFlow, ClientAuthReply, ServerAuthFlow, ServerAuthReply,
};
use crate::error::NetworkResult;

const CHALLENGE_LEN: usize = 32;

/// Domain separator of the response digest
const DOMAIN_RESPONSE: &[u8] = b"hopmesh/shared-secret/v1";

/// Authenticates peers that know the same secret.
#[derive(Clone)]
pub struct SharedSecretAuth {
    secret: Vec<u8>,
}

impl SharedSecretAuth {
    /// Method id of shared-secret authentication.
    pub const ID: &'static str = "shared-secret";

    /// Create a provider for `secret`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SharedSecretAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretAuth")
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn len_prefixed(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u32).to_be_bytes());
    hasher.update(data);
}

/// Compute the expected response for a challenge.
fn compute_response(
    secret: &[u8],
    challenge: &[u8],
    server_security: Option<&[u8]>,
    client_security: Option<&[u8]>,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_RESPONSE);
    len_prefixed(&mut hasher, secret);
    len_prefixed(&mut hasher, challenge);
    len_prefixed(&mut hasher, server_security.unwrap_or_default());
    len_prefixed(&mut hasher, client_security.unwrap_or_default());
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

struct ClientFlow {
    secret: Vec<u8>,
    ctx: AuthContext,
    answered: bool,
}

#[async_trait]
impl ClientAuthFlow for ClientFlow {
    async fn initial_message(&mut self) -> NetworkResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn receive_data(&mut self, data: &[u8]) -> NetworkResult<ClientAuthReply> {
        if self.answered || data.len() != CHALLENGE_LEN {
            debug!(len = data.len(), "Unexpected shared-secret challenge");
            return Ok(ClientAuthReply::Reject);
        }
        self.answered = true;
        // server is remote from the client's point of view
        let response = compute_response(
            &self.secret,
            data,
            self.ctx.remote_public_security.as_deref(),
            self.ctx.local_public_security.as_deref(),
        );
        Ok(ClientAuthReply::Data(response.to_vec()))
    }

    async fn destroy(&mut self) {
        self.secret.fill(0);
    }
}

struct ServerFlow {
    secret: Vec<u8>,
    ctx: AuthContext,
    challenge: Option<[u8; CHALLENGE_LEN]>,
}

#[async_trait]
impl ServerAuthFlow for ServerFlow {
    async fn receive_initial(&mut self, _data: &[u8]) -> NetworkResult<ServerAuthReply> {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.challenge = Some(challenge);
        Ok(ServerAuthReply::Data(challenge.to_vec()))
    }

    async fn receive_data(&mut self, data: &[u8]) -> NetworkResult<ServerAuthReply> {
        let Some(challenge) = self.challenge.take() else {
            return Ok(ServerAuthReply::Reject);
        };
        let expected = compute_response(
            &self.secret,
            &challenge,
            self.ctx.local_public_security.as_deref(),
            self.ctx.remote_public_security.as_deref(),
        );
        if constant_time_eq(&expected, data) {
            Ok(ServerAuthReply::Ok)
        } else {
            debug!("Shared-secret response mismatch");
            Ok(ServerAuthReply::Reject)
        }
    }

    async fn destroy(&mut self) {
        self.secret.fill(0);
        self.challenge = None;
    }
}

impl AuthProvider for SharedSecretAuth {
    fn id(&self) -> &str {
        Self::ID
    }

    fn create_client_flow(&self, ctx: &AuthContext) -> Option<Box<dyn ClientAuthFlow>> {
        Some(Box::new(ClientFlow {
            secret: self.secret.clone(),
            ctx: ctx.clone(),
            answered: false,
        }))
    }

    fn create_server_flow(&self, ctx: &AuthContext) -> Option<Box<dyn ServerAuthFlow>> {
        Some(Box::new(ServerFlow {
            secret: self.secret.clone(),
            ctx: ctx.clone(),
            challenge: None,
        }))
    }
}
