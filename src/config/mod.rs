//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (module flag descriptors)
//!     → config file (TOML, discovered or explicit)   loader.rs
//!     → environment (<APP>_<KEY>)
//!     → CLI flags given on the command line           params.rs
//!     → Settings (merged view)                        settings.rs
//!     → Module::load deserializes its own subtree
//!
//! On file change:
//!     watcher.rs detects a burst of writes
//!     → debounced callback
//!     → orchestrator reload signal
//!     → Settings::refresh re-reads the file before the next start
//! ```
//!
//! # Design Decisions
//! - Settings are never validated as a whole; each module owns its subtree
//! - Every module must be usable with an empty subtree
//! - Flag defaults live in the lowest layer so a config file can change them

pub mod loader;
pub mod params;
pub mod settings;
pub mod watcher;

pub use loader::{discover, ConfigError};
pub use params::{bind_flags, setup_command_params, Param, ParamValue};
pub use settings::Settings;
pub use watcher::{ConfigWatcher, WatchGuard};
