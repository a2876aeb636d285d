//! The control loop sequencing start, reload and close.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::build_info::build_details;
use crate::config::{ConfigError, Settings};
use crate::handler::{HandlerError, ServiceHandler};
use crate::lifecycle::assembly::Assembly;
use crate::lifecycle::signals::{self, SignalHandle, Signals};
use crate::lifecycle::tasks::{BoxError, TaskGroup};
use crate::modules::{otel, rpc, ModuleError, Registry, RegistryError, Target};
use crate::observability::{Telemetry, TelemetryError, TelemetryOption};
use crate::server::{GatewayOption, Middleware, Server, ServerError, ServerOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Reloading,
    Closing,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Reloading => "reloading",
            LifecycleState::Closing => "closing",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to read configuration")]
    Config(#[from] ConfigError),

    #[error("failed to load modules")]
    Registry(#[from] RegistryError),

    #[error("module '{module}' failed to assemble options")]
    Assemble {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error("failed to set up telemetry")]
    Telemetry(#[from] TelemetryError),

    #[error("service handler failed")]
    Handler(#[from] HandlerError),

    #[error("server failed")]
    Server(#[from] ServerError),

    #[error("server exited before it was ready")]
    NotReady(#[source] Option<BoxError>),
}

impl LifecycleError {
    fn assemble(module: &str, source: ModuleError) -> Self {
        LifecycleError::Assemble {
            module: module.to_string(),
            source,
        }
    }
}

/// Option lists for one run.
struct Assembled {
    telemetry: Vec<TelemetryOption>,
    server: Vec<ServerOption>,
}

pub struct Orchestrator<A: Assembly> {
    assembly: A,
    registry: Arc<Registry>,
    settings: Settings,
    handle: SignalHandle,
    signals: Signals,
    state: watch::Sender<LifecycleState>,
    tasks: TaskGroup,
    handler: Option<Arc<A::Handler>>,
    telemetry: Option<A::Telemetry>,
    server: Option<Arc<A::Server>>,
}

impl<A: Assembly> Orchestrator<A> {
    pub fn new(assembly: A, registry: Arc<Registry>, settings: Settings) -> Self {
        let (handle, signals) = signals::channel();
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            assembly,
            registry,
            settings,
            handle,
            signals,
            state,
            tasks: TaskGroup::new(),
            handler: None,
            telemetry: None,
            server: None,
        }
    }

    /// Handle for raising reload and close from outside the loop.
    pub fn handle(&self) -> SignalHandle {
        self.handle.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Start the service and process signals until closed.
    ///
    /// Start failures are returned immediately. After a close, the result
    /// of stopping the server is returned.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        self.handle.start();
        loop {
            tokio::select! {
                biased;
                Some(()) = self.signals.close.recv() => return self.close().await,
                Some(()) = self.signals.start.recv() => {
                    let state = *self.state.borrow();
                    if state == LifecycleState::Idle {
                        self.start().await?;
                    } else {
                        tracing::debug!(%state, "start ignored, already started");
                    }
                }
                Some(()) = self.signals.reload.recv() => self.reload().await?,
                else => return Ok(()),
            }
        }
    }

    fn set_state(&self, state: LifecycleState) {
        tracing::debug!(%state, "lifecycle transition");
        self.state.send_replace(state);
    }

    async fn start(&mut self) -> Result<(), LifecycleError> {
        self.set_state(LifecycleState::Starting);
        let assembled = self.assemble()?;
        self.launch(assembled).await
    }

    /// Re-read settings and project every module into option lists.
    fn assemble(&mut self) -> Result<Assembled, LifecycleError> {
        self.settings.refresh()?;
        self.registry.load(&self.settings)?;

        let mut telemetry = Vec::new();
        match self.registry.get(otel::NAME) {
            Ok(module) => {
                tracing::debug!(module = otel::NAME, "loading module");
                module
                    .customize(Target::Telemetry(&mut telemetry))
                    .map_err(|e| LifecycleError::assemble(otel::NAME, e))?;
            }
            Err(RegistryError::NotFound { .. }) => {
                tracing::debug!("no telemetry module registered");
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(module = rpc::NAME, "loading module");
        let mut server = Vec::new();
        self.registry
            .get(rpc::NAME)?
            .customize(Target::Server(&mut server))
            .map_err(|e| LifecycleError::assemble(rpc::NAME, e))?;

        let build_info = Middleware::BuildInfo(build_details());
        server.push(ServerOption::HttpGatewayOptions(vec![GatewayOption::Middleware(
            build_info,
        )]));

        Ok(Assembled { telemetry, server })
    }

    async fn launch(&mut self, assembled: Assembled) -> Result<(), LifecycleError> {
        if !assembled.telemetry.is_empty() {
            let telemetry = self
                .assembly
                .telemetry(assembled.telemetry, &mut self.tasks)?;
            self.telemetry = Some(telemetry);
        }

        let handler = match self.handler.clone() {
            Some(handler) => handler,
            None => {
                tracing::info!("starting service handler");
                match self.assembly.handler() {
                    Ok(handler) => {
                        let handler = Arc::new(handler);
                        self.handler = Some(handler.clone());
                        handler
                    }
                    Err(e) => return Err(self.abort_start(e.into()).await),
                }
            }
        };

        tracing::info!("starting server");
        let mut options = assembled.server;
        options.push(ServerOption::ServiceProvider(handler.service()));
        let server = match self.assembly.server(options) {
            Ok(server) => Arc::new(server),
            Err(e) => return Err(self.abort_start(e.into()).await),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let running = server.clone();
        self.tasks.spawn("rpc-server", async move {
            running.start(ready_tx).await.map_err(BoxError::from)
        });

        if ready_rx.await.is_err() {
            self.flush_telemetry();
            let cause = self.tasks.wait().await;
            return Err(LifecycleError::NotReady(cause));
        }
        self.server = Some(server);
        self.set_state(LifecycleState::Running);
        tracing::info!("server is ready and waiting for requests");
        Ok(())
    }

    /// Undo a partial start so no background task outlives it.
    async fn abort_start(&mut self, err: LifecycleError) -> LifecycleError {
        self.flush_telemetry();
        self.tasks.wait().await;
        err
    }

    /// Stop the running server and start again from fresh settings.
    ///
    /// The option lists for the next start are assembled before the old
    /// server stops, so they reflect settings read before the handler's
    /// `reload` hook runs.
    async fn reload(&mut self) -> Result<(), LifecycleError> {
        tracing::info!("reloading server");
        // the running server stays up unless the new settings assemble
        let assembled = match self.assemble() {
            Ok(assembled) => assembled,
            Err(e) => {
                tracing::error!(error = ?e, "reload aborted, keeping the current server");
                return Ok(());
            }
        };

        self.set_state(LifecycleState::Reloading);
        self.drain().await;
        if let Some(handler) = &self.handler {
            if let Err(e) = handler.reload() {
                tracing::warn!(error = %e, "service handler reload failed");
            }
        }

        self.set_state(LifecycleState::Starting);
        self.launch(assembled).await
    }

    /// Stop the server, flush telemetry and wait for every task of the run.
    async fn drain(&mut self) -> Option<ServerError> {
        let mut stop_error = None;
        if let Some(server) = self.server.take() {
            if let Err(e) = server.stop(true).await {
                tracing::error!(error = %e, "server stop");
                stop_error = Some(e);
            }
        }
        self.flush_telemetry();
        self.tasks.wait().await;
        stop_error
    }

    fn flush_telemetry(&mut self) {
        if let Some(telemetry) = self.telemetry.take() {
            telemetry.flush();
        }
    }

    async fn close(&mut self) -> Result<(), LifecycleError> {
        tracing::info!("closing server");
        self.set_state(LifecycleState::Closing);

        if let Some(handler) = &self.handler {
            if let Err(e) = handler.close() {
                tracing::error!(error = %e, "service handler close");
            }
        }
        let result = match self.drain().await {
            Some(e) => Err(e.into()),
            None => Ok(()),
        };

        self.signals.close_all();
        self.set_state(LifecycleState::Stopped);
        tracing::info!("server stopped");
        result
    }
}
