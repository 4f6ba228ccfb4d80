//! # Microws
//!
//! Namespace-addressed RPC between independent processes.
//!
//! Every process runs an [`Agent`]: it listens on a WebSocket port, announces
//! its namespace to a registry, serves [`Service`] implementations bound to
//! command paths, and calls other namespaces with `ws://<namespace>/<cmd>`
//! addresses. Calls are multiplexed over one duplex channel per peer, with
//! timeouts and cancellation carried on the wire.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use microws_net as net;
pub use microws_proto as proto;

/// Error types for the agent
pub mod error;

/// Agent configuration and reconnect policy
pub mod config;

/// Dependency container for services
pub mod container;

/// Service trait and call context
pub mod service;

/// The agent facade
pub mod agent;

pub use agent::Agent;
pub use config::{AgentConfig, ReconnectPolicy};
pub use container::Container;
pub use error::AgentError;
pub use microws_proto::{Exception, Status};
pub use service::{Context, Service};

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
