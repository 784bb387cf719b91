//! Setup service: lets a UI ask whether the code node is ready.

use super::repository::encode;
use crate::distributed::{DispatchFuture, RemoteClient, ServiceDefinition, ServiceError};
use async_trait::async_trait;
use codefleet_db::RepositoryRecords;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

pub const SETUP: &str = "setup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatus {
    pub ready: bool,
    /// Role of the node that answered.
    pub role: String,
    pub repositories: usize,
}

#[async_trait]
pub trait SetupService: Send + Sync {
    async fn setup(&self) -> Result<SetupStatus, ServiceError>;
}

pub struct SetupServiceDefinition;

impl ServiceDefinition for SetupServiceDefinition {
    const NAME: &'static str = "setup";
    type Handler = dyn SetupService;

    fn forwarder(client: RemoteClient) -> Arc<dyn SetupService> {
        Arc::new(SetupForwarder { client })
    }

    fn dispatch(handler: Arc<dyn SetupService>, method: String, _body: Value) -> DispatchFuture {
        async move {
            match method.as_str() {
                SETUP => encode(handler.setup().await?),
                _ => Err(ServiceError::UnknownMethod {
                    service: Self::NAME.to_string(),
                    method,
                }),
            }
        }
        .boxed()
    }
}

pub struct LocalSetupService {
    role: &'static str,
    records: RepositoryRecords,
}

impl LocalSetupService {
    pub fn new(role: &'static str, records: RepositoryRecords) -> Self {
        Self { role, records }
    }
}

#[async_trait]
impl SetupService for LocalSetupService {
    async fn setup(&self) -> Result<SetupStatus, ServiceError> {
        let repositories = self.records.list().await?.len();
        Ok(SetupStatus {
            ready: true,
            role: self.role.to_string(),
            repositories,
        })
    }
}

pub struct SetupForwarder {
    client: RemoteClient,
}

#[async_trait]
impl SetupService for SetupForwarder {
    async fn setup(&self) -> Result<SetupStatus, ServiceError> {
        self.client
            .call(SetupServiceDefinition::NAME, SETUP, &json!({}))
            .await
    }
}
