//! Startup topology decision.

use super::LivenessToken;
use async_trait::async_trait;
use codefleet_config::ServerOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Path of the liveness check, relative to a node's base address.
pub const CHECK_PATH: &str = "api/code/internal/check";

/// Where a service call is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEndpoint {
    pub identity: String,
    pub is_local: bool,
    pub base_address: Option<Url>,
}

impl NodeEndpoint {
    pub fn local(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            is_local: true,
            base_address: None,
        }
    }

    pub fn remote(base_address: Url) -> Self {
        Self {
            identity: base_address.to_string(),
            is_local: false,
            base_address: Some(base_address),
        }
    }
}

/// The role this process plays in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    /// No code node configured; everything runs here.
    SingleNode,
    /// The configured code node is this process.
    CodeNode,
    /// Another process is the code node and owns all repositories.
    Satellite {
        endpoint: NodeEndpoint,
        /// The code node never answered during startup.
        degraded: bool,
    },
}

impl NodeRole {
    pub fn name(&self) -> &'static str {
        match self {
            NodeRole::SingleNode => "single-node",
            NodeRole::CodeNode => "code-node",
            NodeRole::Satellite { .. } => "satellite",
        }
    }

    /// Whether this process owns the job queue and workers.
    pub fn runs_jobs(&self) -> bool {
        !matches!(self, NodeRole::Satellite { .. })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("code node rejected the liveness token")]
    Rejected,

    #[error("gave up after {attempts} probe attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    me: bool,
}

/// Asks a code node whether it is the calling process.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn check(&self, base: &Url, token: &LivenessToken) -> Result<bool, ProbeError>;
}

/// Probe over HTTP against the check route.
#[derive(Clone, Default)]
pub struct HttpLivenessProbe {
    client: reqwest::Client,
}

impl HttpLivenessProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

/// `base` joined with `path`, keeping any path prefix on `base`.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn check(&self, base: &Url, token: &LivenessToken) -> Result<bool, ProbeError> {
        let response = self
            .client
            .get(endpoint_url(base, CHECK_PATH))
            .query(&[("token", token.encode())])
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProbeError::Rejected);
        }
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body: CheckResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(body.me)
    }
}

/// Resolves the process role once, at startup.
pub struct NodeRouter {
    code_node_url: Option<Url>,
    interval: Duration,
    attempts: Option<u32>,
    token: LivenessToken,
    probe: Arc<dyn LivenessProbe>,
}

impl NodeRouter {
    pub fn new(options: &ServerOptions, token: LivenessToken, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            code_node_url: options.code_node_url.clone(),
            interval: options.probe.interval,
            attempts: options.probe.retries,
            token,
            probe,
        }
    }

    /// Probe the code node until it answers or the attempt budget runs out.
    ///
    /// Never fails: an unreachable code node makes this process a degraded
    /// satellite.
    pub async fn resolve(&self) -> NodeRole {
        let Some(url) = &self.code_node_url else {
            info!("No code node configured, running as a single node");
            return NodeRole::SingleNode;
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.probe.check(url, &self.token).await {
                Ok(true) => {
                    info!(code_node = %url, "This process is the code node");
                    return NodeRole::CodeNode;
                }
                Ok(false) => {
                    info!(code_node = %url, "Running as a satellite");
                    return NodeRole::Satellite {
                        endpoint: NodeEndpoint::remote(url.clone()),
                        degraded: false,
                    };
                }
                Err(e) => {
                    warn!(code_node = %url, attempt, error = %e, "Liveness probe failed");
                }
            }

            if self.attempts.is_some_and(|max| attempt >= max.max(1)) {
                let e = ProbeError::Exhausted { attempts: attempt };
                warn!(code_node = %url, error = %e, "Running as a degraded satellite");
                return NodeRole::Satellite {
                    endpoint: NodeEndpoint::remote(url.clone()),
                    degraded: true,
                };
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
