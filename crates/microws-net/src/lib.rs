//! # Microws Net
//!
//! The connection fabric: a WebSocket listener, the host to channel table,
//! single-flight outbound dialing, and the procedure table every channel
//! dispatches into.

#![warn(missing_docs)]

/// `ws://<namespace>/<cmd>` call addresses
pub mod address;

/// One duplex connection to a peer
pub mod channel;

/// Listener, channel table and outbound dialing
pub mod fabric;

/// Procedure registration table
pub mod routes;

/// Free port detection
pub mod port;

/// Transport error types
pub mod error;

pub use address::Address;
pub use channel::{Channel, Direction};
pub use fabric::{Fabric, FabricConfig, FabricObserver, ObserverId};
pub use routes::{Procedure, RouteTable};
pub use port::detect_port;
pub use error::TransportError;
