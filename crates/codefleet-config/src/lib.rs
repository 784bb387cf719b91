//! KDL configuration parsing for codefleet.
//!
//! A single document configures one server process: where it listens, where
//! working copies live, how it finds the code node and how often the
//! schedulers run.

pub mod error;
pub mod server;

pub use error::{ConfigError, ConfigResult};
pub use server::{
    ProbeOptions, QueueOptions, RepoConfig, SchedulerOptions, ServerOptions, WorkerOptions,
    load_server_options, parse_server_options,
};
