//! Worker identity boundary
//!
//! Registration presents an opaque credential; the verifier decides whether
//! it belongs to the claimed worker id.

use std::collections::BTreeMap;

use agora_common::{IdentityError, WorkerId};
use async_trait::async_trait;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// True when `credential` authenticates `worker_id`
    async fn verify(&self, worker_id: &WorkerId, credential: Option<&str>) -> Result<bool, IdentityError>;
}

/// Accepts every worker
pub struct AllowAll;

#[async_trait]
impl IdentityVerifier for AllowAll {
    async fn verify(&self, _worker_id: &WorkerId, _credential: Option<&str>) -> Result<bool, IdentityError> {
        Ok(true)
    }
}

/// Fixed worker → token table
pub struct StaticTokenVerifier {
    tokens: BTreeMap<WorkerId, String>,
}

impl StaticTokenVerifier {
    pub fn new<I, K, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<WorkerId>,
        V: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, worker_id: &WorkerId, credential: Option<&str>) -> Result<bool, IdentityError> {
        Ok(match (self.tokens.get(worker_id), credential) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        })
    }
}
