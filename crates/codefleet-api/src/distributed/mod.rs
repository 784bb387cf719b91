//! Node topology and cross-node service calls.

pub mod error;
pub mod forward;
pub mod registry;
pub mod router;
pub mod token;

pub use error::ServiceError;
pub use forward::{RemoteClient, TOKEN_HEADER};
pub use registry::{
    DispatchFuture, REQUEST_ID_HEADER, RequestContext, ServiceDefinition, ServiceRegistry,
};
pub use router::{
    HttpLivenessProbe, LivenessProbe, NodeEndpoint, NodeRole, NodeRouter, ProbeError,
};
pub use token::LivenessToken;
