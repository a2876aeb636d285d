//! The `server` command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::ArgMatches;

use crate::cli::{Cli, APP_NAME};
use crate::config::{self, bind_flags, ConfigWatcher, Settings, WatchGuard};
use crate::lifecycle::{forward_os_signals, Orchestrator, SignalHandle, StandardAssembly};
use crate::modules::Registry;
use crate::observability::logging;

pub async fn run(cli: &Cli, matches: &ArgMatches, registry: Arc<Registry>) -> anyhow::Result<()> {
    logging::init(cli.silent);

    let mut settings = Settings::new(APP_NAME);
    bind_flags(matches, &registry.flags(), &mut settings);
    match config::discover(APP_NAME, cli.config.as_deref()) {
        Some(path) => match config::loader::load_file(&path) {
            Ok(_) => {
                tracing::info!(file = %path.display(), "using configuration file");
                settings.set_file(path);
            }
            Err(e) => tracing::warn!(error = ?e, "failed to read configuration file, using defaults"),
        },
        None => tracing::info!("no configuration file found, using defaults"),
    }
    let watched = settings.file_path().map(Path::to_path_buf);

    let orchestrator = Orchestrator::new(StandardAssembly, registry, settings);
    let handle = orchestrator.handle();
    let _watch = match &watched {
        Some(path) => Some(watch_config(path, handle.clone())?),
        None => None,
    };
    tokio::spawn(async move {
        if let Err(e) = forward_os_signals(handle).await {
            tracing::error!(error = %e, "failed to listen for OS signals");
        }
    });

    orchestrator.run().await.context("server terminated with an error")
}

/// Map changes of the configuration file to the reload signal.
fn watch_config(path: &Path, handle: SignalHandle) -> anyhow::Result<WatchGuard> {
    let guard = ConfigWatcher::new(path)
        .run(move || {
            tracing::info!("configuration file changed");
            handle.reload();
        })
        .with_context(|| format!("failed to watch {}", path.display()))?;
    Ok(guard)
}
