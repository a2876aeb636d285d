//! `echoctl`: configuration driven echo service.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file ─┐
//!   environment ─┼─▶ Settings ─▶ Registry::load ─▶ modules (rpc, tls, otel, middleware)
//!   CLI flags ───┘        ▲                        │ customize
//!                         │                        ▼
//!   SIGHUP / file change ─┴─▶ Orchestrator ─▶ telemetry + RpcServer (+ handler)
//!   SIGTERM / SIGINT ────────▶   (start / reload / close, one at a time)
//! ```

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match echo_service::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
