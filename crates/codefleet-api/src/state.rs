//! Application state.

use crate::distributed::{LivenessToken, ServiceRegistry};
use crate::error::ApiError;
use std::sync::{Arc, OnceLock};

/// Shared application state.
///
/// The HTTP server starts before the node role is known, so the registry is
/// installed later. Until then service routes answer 503.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    token: LivenessToken,
    shared_secret: String,
    registry: OnceLock<Arc<ServiceRegistry>>,
}

impl AppState {
    pub fn new(token: LivenessToken, shared_secret: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                token,
                shared_secret: shared_secret.into(),
                registry: OnceLock::new(),
            }),
        }
    }

    /// This process's signed token.
    pub fn token(&self) -> &LivenessToken {
        &self.inner.token
    }

    /// Whether `token` was signed with the cluster secret.
    pub fn verify(&self, token: &LivenessToken) -> bool {
        token.verify(&self.inner.shared_secret)
    }

    /// Whether `token` carries this process's own nonce.
    pub fn is_self(&self, token: &LivenessToken) -> bool {
        token.nonce() == self.inner.token.nonce()
    }

    /// Install the registry once the role is resolved. Returns false if one
    /// was already installed.
    pub fn install(&self, registry: Arc<ServiceRegistry>) -> bool {
        self.inner.registry.set(registry).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.registry.get().is_some()
    }

    pub fn registry(&self) -> Result<&Arc<ServiceRegistry>, ApiError> {
        self.inner
            .registry
            .get()
            .ok_or_else(|| ApiError::Unavailable("node is still starting".to_string()))
    }
}
