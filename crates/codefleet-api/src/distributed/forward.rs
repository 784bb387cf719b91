//! JSON-over-HTTP client for calling services on the code node.

use super::router::endpoint_url;
use super::{LivenessToken, ServiceError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Header carrying the caller's signed token on internal calls.
pub const TOKEN_HEADER: &str = "x-codefleet-token";

#[derive(Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
    base: Url,
    token: LivenessToken,
}

impl RemoteClient {
    pub fn new(base: Url, token: LivenessToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Invoke `service.method` remotely.
    ///
    /// Error replies are re-raised as [`ServiceError::Remote`] with the
    /// remote status and message.
    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        request: &Req,
    ) -> Result<Resp, ServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = endpoint_url(&self.base, &format!("api/code/internal/{service}/{method}"));
        debug!(%url, "Forwarding service call");

        let response = self
            .client
            .post(url)
            .header(TOKEN_HEADER, self.token.encode())
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let status = body
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(status.as_u16());
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("remote call failed with status {status}"));
            return Err(ServiceError::Remote { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))
    }
}
