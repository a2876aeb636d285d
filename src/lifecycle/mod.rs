//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGHUP / config file change → reload
//!     SIGTERM / SIGINT / SIGQUIT  → close
//!
//! Orchestrator (orchestrator.rs), one transition at a time:
//!     start  → refresh settings → Registry::load → customize otel, rpc
//!            → telemetry → handler → server → wait for ready → RUNNING
//!     reload → preflight assemble → stop server → flush telemetry
//!            → wait tasks (tasks.rs) → handler reload → start
//!     close  → handler close → stop server → flush telemetry
//!            → wait tasks → close signal channels → STOPPED
//!
//! Assembly (assembly.rs):
//!     builds the handler, telemetry and server the orchestrator drives
//! ```
//!
//! # Design Decisions
//! - Failures while starting are fatal; there is no half-started state
//! - A reload whose new settings fail to assemble keeps the old server
//! - Teardown failures are logged and the remaining steps still run

pub mod assembly;
pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use assembly::{Assembly, StandardAssembly};
pub use orchestrator::{LifecycleError, LifecycleState, Orchestrator};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{forward_os_signals, SignalHandle};
pub use tasks::TaskGroup;
