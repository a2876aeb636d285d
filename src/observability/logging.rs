//! Structured logging.
//!
//! # Design Decisions
//! - Uses the tracing crate with an `EnvFilter`; `RUST_LOG` wins over the
//!   built-in default directives
//! - Silent mode filters everything out instead of removing the layer

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_DIRECTIVES: &str = "echo_service=info,tower_http=info";

/// Install the global subscriber. Later calls are ignored.
pub fn init(silent: bool) {
    let filter = if silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
