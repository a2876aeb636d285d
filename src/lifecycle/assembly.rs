//! Factories for the collaborators the orchestrator drives.

use crate::handler::{EchoHandler, HandlerError, ServiceHandler};
use crate::lifecycle::TaskGroup;
use crate::observability::{Instrumentation, Telemetry, TelemetryError, TelemetryOption};
use crate::server::{RpcServer, Server, ServerError, ServerOption};

/// Builds the handler, telemetry pipeline and server for each run.
pub trait Assembly: Send + Sync {
    type Handler: ServiceHandler;
    type Telemetry: Telemetry;
    type Server: Server;

    /// Called once, on the first start.
    fn handler(&self) -> Result<Self::Handler, HandlerError>;

    /// Called on every start with a non-empty option list. Background tasks
    /// go into `tasks` so reload and close can wait for them.
    fn telemetry(
        &self,
        options: Vec<TelemetryOption>,
        tasks: &mut TaskGroup,
    ) -> Result<Self::Telemetry, TelemetryError>;

    fn server(&self, options: Vec<ServerOption>) -> Result<Self::Server, ServerError>;
}

/// The echo service wired to the reference server and Prometheus telemetry.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardAssembly;

impl Assembly for StandardAssembly {
    type Handler = EchoHandler;
    type Telemetry = Instrumentation;
    type Server = RpcServer;

    fn handler(&self) -> Result<EchoHandler, HandlerError> {
        Ok(EchoHandler::new())
    }

    fn telemetry(
        &self,
        options: Vec<TelemetryOption>,
        tasks: &mut TaskGroup,
    ) -> Result<Instrumentation, TelemetryError> {
        Instrumentation::setup(options, tasks)
    }

    fn server(&self, options: Vec<ServerOption>) -> Result<RpcServer, ServerError> {
        RpcServer::new(options)
    }
}
