//! KAR Debug Core
//!
//! The live-state engine of the actor debugger. A coordinator attaches to one node of a
//! KAR cluster, applies the node's pause/breakpoint/busy events to an in-memory model of
//! what is blocked on what, and answers debugger clients from that model.

pub mod config;
pub mod context;
pub mod deadlock;
pub mod engine;
pub mod error;
pub mod filter;
pub mod node_link;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod step;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::DebuggerConfig;
pub use context::DebugContext;
pub use error::{DebuggerError, ErrorKind};
pub use node_link::{NodeLink, NodeSender};
pub use registry::PendingRequestRegistry;
pub use store::StateStore;

/// Result type alias using DebuggerError
pub type Result<T> = std::result::Result<T, DebuggerError>;
