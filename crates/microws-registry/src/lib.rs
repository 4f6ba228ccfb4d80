//! # Microws Registry
//!
//! The namespace directory agents announce themselves to and resolve each
//! other through. State is memory-only: entries live as long as the channel
//! that announced them.

#![warn(missing_docs)]

/// Registry configuration
pub mod config;

/// Directory state and the registry node
pub mod registry;

pub use config::{RegistryConfig, DEFAULT_PORT};
pub use registry::Registry;
