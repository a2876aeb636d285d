//! Configuration modules and the registry that drives them.
//!
//! # Data Flow
//! ```text
//! Settings
//!     → Registry::load (each Module::load, registration order, fail fast)
//!     → orchestrator asks the registry for a module by name
//!     → Module::customize(Target::Server(&mut options))
//!     → option list handed to the server builder
//!
//! Providers:
//!     rpc ──provide()──▶ tls   (expanded certificate material)
//! ```
//!
//! # Design Decisions
//! - A module owns exactly one settings subtree and must work with it absent
//! - `customize` targets are a tagged union; a module rejects variants it
//!   does not build for and never touches the list in that case
//! - Module state sits behind `ArcSwap` so every method takes `&self`

use std::fmt;

use thiserror::Error;

use crate::config::{ConfigError, Param, Settings};
use crate::observability::instrumentation::TelemetryOption;
use crate::server::{Middleware, ServerOption};

pub mod middleware;
pub mod otel;
pub mod registry;
pub mod rpc;
pub mod tls;

pub use middleware::MiddlewareModule;
pub use otel::TelemetryModule;
pub use registry::{Registry, RegistryError};
pub use rpc::RpcModule;
pub use tls::{TlsMaterial, TlsModule};

/// Option list a module can contribute to.
#[derive(Debug)]
pub enum Target<'a> {
    Server(&'a mut Vec<ServerOption>),
    Telemetry(&'a mut Vec<TelemetryOption>),
    Middleware(&'a mut Vec<Middleware>),
}

impl Target<'_> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Server(_) => TargetKind::Server,
            Target::Telemetry(_) => TargetKind::Telemetry,
            Target::Middleware(_) => TargetKind::Middleware,
        }
    }
}

/// Discriminant of [`Target`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Server,
    Telemetry,
    Middleware,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Server => "server",
            TargetKind::Telemetry => "telemetry",
            TargetKind::Middleware => "middleware",
        };
        f.write_str(name)
    }
}

/// Error type for module operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module's subtree could not be deserialized.
    #[error("module '{module}': invalid settings")]
    Settings {
        module: String,
        #[source]
        source: ConfigError,
    },

    /// Settings are well formed but contradictory or incomplete.
    #[error("module '{module}': {reason}")]
    Config { module: String, reason: String },

    /// `customize` was called with a list of the wrong type.
    #[error("module '{module}': target must be a {expected} option list, got {actual}")]
    TargetMismatch {
        module: String,
        expected: TargetKind,
        actual: TargetKind,
    },

    /// The module does not contribute to any option list.
    #[error("module '{module}' does not customize any target")]
    Unsupported { module: String },

    /// A resource referenced by the settings could not be produced.
    #[error("module '{module}': {reason}")]
    Resource {
        module: String,
        reason: String,
        #[source]
        source: std::io::Error,
    },
}

impl ModuleError {
    /// Whether the error denotes a wiring bug rather than a bad configuration.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ModuleError::TargetMismatch { .. } | ModuleError::Unsupported { .. }
        )
    }

    pub(crate) fn config(module: &str, reason: impl Into<String>) -> Self {
        ModuleError::Config {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(module: &str, expected: TargetKind, actual: TargetKind) -> Self {
        ModuleError::TargetMismatch {
            module: module.to_string(),
            expected,
            actual,
        }
    }
}

/// A self-contained unit owning one configuration subtree.
pub trait Module: Send + Sync {
    /// Registry key and diagnostic label.
    fn name(&self) -> &str;

    /// Read the module's subtree from `settings`, falling back to defaults
    /// when it is absent.
    fn load(&self, settings: &Settings) -> Result<(), ModuleError>;

    /// Settings exposed as command-line flags.
    fn flags(&self, _app_name: &str) -> Vec<Param> {
        Vec::new()
    }

    /// Append options derived from the current settings to `target`.
    ///
    /// On error `target` is left as it was. Calling this twice on the same
    /// list appends twice.
    fn customize(&self, target: Target<'_>) -> Result<(), ModuleError>;
}

/// A module that also manufactures a resource for other modules.
pub trait Provider: Module {
    type Resource;

    /// Expand the loaded settings into a ready-to-use resource. The caller
    /// owns the returned value.
    fn provide(&self) -> Result<Self::Resource, ModuleError>;
}

/// Deserialize `key` into `T`, or return `T::default()` when it is absent.
pub(crate) fn load_section<T>(module: &str, settings: &Settings, key: &str) -> Result<T, ModuleError>
where
    T: serde::de::DeserializeOwned + Default,
{
    settings
        .section::<T>(key)
        .map(Option::unwrap_or_default)
        .map_err(|source| ModuleError::Settings {
            module: module.to_string(),
            source,
        })
}
