//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server and gateway middleware:
//!     → metrics.rs (request counters and latency histograms)
//!     → logging.rs (structured log events through tracing)
//!
//! otel module options (Vec<TelemetryOption>):
//!     → instrumentation.rs (Prometheus recorder, scrape listener, samplers)
//!     → flushed by the lifecycle on every reload and at close
//! ```
//!
//! # Design Decisions
//! - Metrics are recorded through the `metrics` facade and are a no-op
//!   while no instrumentation is active
//! - Request ids flow through tower-http's request-id layers

pub mod instrumentation;
pub mod logging;
pub mod metrics;

pub use instrumentation::{Instrumentation, Telemetry, TelemetryError, TelemetryOption};
