//! Node routing, service registry and HTTP API for codefleet.
//!
//! A process resolves its role once at startup ([`distributed::NodeRouter`]),
//! then serves the repository API either from its own queue or by forwarding
//! to the code node.

pub mod bootstrap;
pub mod distributed;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
