//! Typed service handlers, resolved per node role.
//!
//! A [`ServiceDefinition`] names a service and its handler trait. On a node
//! that runs jobs the registry holds the local handler; on a satellite it
//! holds a forwarder that calls the same method on the code node. Callers
//! only ever see `Arc<D::Handler>` and cannot tell the two apart.

use super::{LivenessToken, NodeEndpoint, NodeRole, RemoteClient, ServiceError};
use axum::http::HeaderMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub type DispatchFuture = BoxFuture<'static, Result<Value, ServiceError>>;

type DispatchFn = Arc<dyn Fn(String, Value) -> DispatchFuture + Send + Sync>;

pub trait ServiceDefinition: 'static {
    const NAME: &'static str;

    /// Handler API, usually a trait object.
    type Handler: ?Sized + Send + Sync + 'static;

    /// A handler that sends every call to the code node.
    fn forwarder(client: RemoteClient) -> Arc<Self::Handler>;

    /// Decode `body`, call `method` on `handler` and encode the reply.
    fn dispatch(handler: Arc<Self::Handler>, method: String, body: Value) -> DispatchFuture;
}

/// Header used to correlate a request across nodes.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request facts used when locating a repository.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            request_id: headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

struct Entry {
    handler: Box<dyn Any + Send + Sync>,
    dispatch: DispatchFn,
}

pub struct ServiceRegistry {
    role: NodeRole,
    local: NodeEndpoint,
    client: Option<RemoteClient>,
    services: RwLock<HashMap<&'static str, Entry>>,
}

impl ServiceRegistry {
    /// `token` signs forwarded calls when this node is a satellite.
    pub fn new(role: NodeRole, identity: impl Into<String>, token: LivenessToken) -> Self {
        let client = match &role {
            NodeRole::Satellite { endpoint, .. } => endpoint
                .base_address
                .clone()
                .map(|base| RemoteClient::new(base, token)),
            _ => None,
        };
        Self {
            role,
            local: NodeEndpoint::local(identity),
            client,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    /// Register the handler for `D`.
    ///
    /// Satellites ignore `local` and install a forwarder. Other roles
    /// require a local handler.
    pub fn register_handler<D: ServiceDefinition>(
        &self,
        local: Option<Arc<D::Handler>>,
    ) -> Result<(), ServiceError> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        if services.contains_key(D::NAME) {
            return Err(ServiceError::HandlerAlreadyRegistered(D::NAME));
        }

        let handler: Arc<D::Handler> = match (&self.client, local) {
            (Some(client), _) => D::forwarder(client.clone()),
            (None, Some(local)) if self.role.runs_jobs() => local,
            _ => return Err(ServiceError::NotAvailable(D::NAME)),
        };

        let target = handler.clone();
        let dispatch: DispatchFn =
            Arc::new(move |method, body| D::dispatch(target.clone(), method, body));
        services.insert(
            D::NAME,
            Entry {
                handler: Box::new(handler),
                dispatch,
            },
        );
        debug!(service = D::NAME, role = self.role.name(), "Registered service handler");
        Ok(())
    }

    pub fn service_for<D: ServiceDefinition>(&self) -> Result<Arc<D::Handler>, ServiceError> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .get(D::NAME)
            .and_then(|entry| entry.handler.downcast_ref::<Arc<D::Handler>>())
            .cloned()
            .ok_or_else(|| ServiceError::NotRegistered(D::NAME.to_string()))
    }

    /// The node that owns `repository_uri` for this request.
    pub fn locate(&self, ctx: &RequestContext, repository_uri: &str) -> NodeEndpoint {
        let endpoint = match &self.role {
            NodeRole::Satellite { endpoint, .. } => endpoint.clone(),
            _ => self.local.clone(),
        };
        debug!(
            repo = %repository_uri,
            node = %endpoint.identity,
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            "Located repository"
        );
        endpoint
    }

    /// Run `service.method` against the registered handler with a JSON body.
    pub async fn dispatch(
        &self,
        service: &str,
        method: &str,
        body: Value,
    ) -> Result<Value, ServiceError> {
        let dispatch = {
            let services = self.services.read().unwrap_or_else(|e| e.into_inner());
            services
                .get(service)
                .map(|entry| entry.dispatch.clone())
                .ok_or_else(|| ServiceError::NotRegistered(service.to_string()))?
        };
        dispatch(method.to_string(), body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;
    use url::Url;

    #[async_trait]
    trait Echo: Send + Sync {
        async fn echo(&self, text: String) -> Result<String, ServiceError>;
    }

    struct LocalEcho;

    #[async_trait]
    impl Echo for LocalEcho {
        async fn echo(&self, text: String) -> Result<String, ServiceError> {
            Ok(format!("local:{text}"))
        }
    }

    struct ForwardEcho(RemoteClient);

    #[async_trait]
    impl Echo for ForwardEcho {
        async fn echo(&self, text: String) -> Result<String, ServiceError> {
            self.0.call("echo", "echo", &text).await
        }
    }

    struct EchoDefinition;

    impl ServiceDefinition for EchoDefinition {
        const NAME: &'static str = "echo";
        type Handler = dyn Echo;

        fn forwarder(client: RemoteClient) -> Arc<dyn Echo> {
            Arc::new(ForwardEcho(client))
        }

        fn dispatch(handler: Arc<dyn Echo>, method: String, body: Value) -> DispatchFuture {
            async move {
                match method.as_str() {
                    "echo" => {
                        let text = serde_json::from_value(body)
                            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
                        Ok(Value::String(handler.echo(text).await?))
                    }
                    _ => Err(ServiceError::UnknownMethod {
                        service: "echo".into(),
                        method,
                    }),
                }
            }
            .boxed()
        }
    }

    fn satellite() -> NodeRole {
        NodeRole::Satellite {
            endpoint: NodeEndpoint::remote(Url::parse("http://code:3000").unwrap()),
            degraded: true,
        }
    }

    fn token() -> LivenessToken {
        LivenessToken::generate("")
    }

    #[tokio::test]
    async fn test_second_registration_rejected() {
        let registry = ServiceRegistry::new(NodeRole::SingleNode, "local", token());
        registry
            .register_handler::<EchoDefinition>(Some(Arc::new(LocalEcho)))
            .unwrap();
        let err = registry
            .register_handler::<EchoDefinition>(Some(Arc::new(LocalEcho)))
            .unwrap_err();
        assert!(matches!(err, ServiceError::HandlerAlreadyRegistered("echo")));
    }

    #[tokio::test]
    async fn test_local_handler_and_dispatch() {
        let registry = ServiceRegistry::new(NodeRole::CodeNode, "local", token());
        assert!(matches!(
            registry.service_for::<EchoDefinition>(),
            Err(ServiceError::NotRegistered(_))
        ));
        registry
            .register_handler::<EchoDefinition>(Some(Arc::new(LocalEcho)))
            .unwrap();

        let echo = registry.service_for::<EchoDefinition>().unwrap();
        assert_eq!(echo.echo("hi".into()).await.unwrap(), "local:hi");

        let reply = registry
            .dispatch("echo", "echo", Value::String("there".into()))
            .await
            .unwrap();
        assert_eq!(reply, Value::String("local:there".into()));

        assert!(matches!(
            registry.dispatch("echo", "shout", Value::Null).await,
            Err(ServiceError::UnknownMethod { .. })
        ));
        assert!(matches!(
            registry.dispatch("missing", "echo", Value::Null).await,
            Err(ServiceError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_local_role_requires_handler() {
        let registry = ServiceRegistry::new(NodeRole::SingleNode, "local", token());
        assert!(matches!(
            registry.register_handler::<EchoDefinition>(None),
            Err(ServiceError::NotAvailable("echo"))
        ));
    }

    #[test]
    fn test_locate_by_role() {
        let local = ServiceRegistry::new(NodeRole::CodeNode, "node-a", token());
        let endpoint = local.locate(&RequestContext::default(), "github.com/a/b");
        assert!(endpoint.is_local);
        assert_eq!(endpoint.identity, "node-a");

        let remote = ServiceRegistry::new(satellite(), "node-b", token());
        let endpoint = remote.locate(&RequestContext::default(), "github.com/a/b");
        assert!(!endpoint.is_local);
        assert_eq!(
            endpoint.base_address.unwrap().as_str(),
            "http://code:3000/"
        );
    }

    #[test]
    fn test_request_context_reads_header() {
        let mut headers = HeaderMap::new();
        assert!(RequestContext::from_headers(&headers).request_id.is_none());
        headers.insert(REQUEST_ID_HEADER, "abc".parse().unwrap());
        assert_eq!(
            RequestContext::from_headers(&headers).request_id.as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_satellite_installs_forwarder() {
        let role = NodeRole::Satellite {
            endpoint: NodeEndpoint::remote(Url::parse("http://127.0.0.1:9").unwrap()),
            degraded: true,
        };
        let registry = ServiceRegistry::new(role, "node-b", token());
        registry
            .register_handler::<EchoDefinition>(Some(Arc::new(LocalEcho)))
            .unwrap();
        // Nothing listens on the discard port, so the forwarder cannot connect.
        let echo = registry.service_for::<EchoDefinition>().unwrap();
        let err = echo.echo("hi".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }
}
