//! Business-logic handler boundary.
//!
//! # Data Flow
//! ```text
//! orchestrator (first start)
//!     → Assembly::handler() creates the handler once
//!     → ServiceHandler::service() describes its routes
//!     → ServerOption::ServiceProvider(descriptor) mounted by the server
//!
//! reload  → ServiceHandler::reload()   (once per reload)
//! close   → ServiceHandler::close()    (once at shutdown)
//! ```

use axum::Router;
use thiserror::Error;

pub mod echo;

pub use echo::EchoHandler;

/// Error type for handler hooks.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to reload service handler: {0}")]
    Reload(String),

    #[error("failed to close service handler: {0}")]
    Close(String),
}

/// Routes exposed by a handler, in a form the server can mount.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    /// `METHOD /path` entries, listed by the reflection endpoint.
    pub methods: Vec<String>,
    pub router: Router,
}

/// The service's business logic as seen by the orchestrator.
pub trait ServiceHandler: Send + Sync + 'static {
    fn service(&self) -> ServiceDescriptor;

    /// Refresh internal resources between two server runs.
    fn reload(&self) -> Result<(), HandlerError>;

    /// Release resources before the process exits.
    fn close(&self) -> Result<(), HandlerError>;
}
