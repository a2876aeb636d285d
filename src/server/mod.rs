//! RPC server subsystem.
//!
//! # Data Flow
//! ```text
//! Vec<ServerOption> (built by modules during customize)
//!     → ServerConfig::from_options (options.rs)
//!     → router: services → reflection → gateway chain (gateway.rs)
//!               → input validation → resource limits → tracing
//!     → start(ready) → listen on TCP, TLS or a unix socket
//!     → stop(graceful) → drain in-flight requests or abort
//! ```
//!
//! # Design Decisions
//! - Construction validates every option so a bad list fails before
//!   anything binds
//! - `start` resolves its ready channel only once the listener is bound
//! - A graceful stop that exceeds the drain timeout is forced

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::sync::oneshot;

pub mod gateway;
pub mod options;
pub mod rate_limit;
pub mod rpc;

pub use options::{
    CorsOptions, Endpoint, GatewayConfig, GatewayOption, HstsOptions, MetadataOptions, Middleware,
    OtelOptions, ResourceLimits, ServerConfig, ServerOption, NETWORK_INTERFACE_ALL,
    NETWORK_INTERFACE_LOCAL,
};
pub use rate_limit::ClientAddr;
pub use rpc::RpcServer;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid TLS material")]
    Tls(#[source] io::Error),

    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error("server already started")]
    AlreadyStarted,

    #[error("requests still in flight after {0:?}")]
    DrainTimeout(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A server the lifecycle can start and stop.
pub trait Server: Send + Sync + 'static {
    /// Serve until stopped. `ready` is resolved once the listener is bound;
    /// it is dropped unresolved when binding fails.
    fn start(&self, ready: oneshot::Sender<()>) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Stop serving. A graceful stop lets in-flight requests finish.
    /// Stopping a server that never started is a no-op.
    fn stop(&self, graceful: bool) -> impl Future<Output = Result<(), ServerError>> + Send;
}
