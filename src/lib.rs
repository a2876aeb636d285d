//! Echo service library: configuration modules, a lifecycle orchestrator and
//! the reference RPC server they assemble.

// Configuration and composition
pub mod config;
pub mod modules;

// Runtime
pub mod handler;
pub mod lifecycle;
pub mod server;

// Cross-cutting concerns
pub mod build_info;
pub mod observability;

pub mod cli;

pub use config::Settings;
pub use lifecycle::{Orchestrator, StandardAssembly};
pub use modules::Registry;
