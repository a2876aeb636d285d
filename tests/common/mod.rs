//! Shared utilities for lifecycle and server integration tests.
#![allow(dead_code)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::sync::{oneshot, watch};

use echo_service::config::Settings;
use echo_service::handler::{HandlerError, ServiceDescriptor, ServiceHandler};
use echo_service::lifecycle::{Assembly, LifecycleState, Shutdown, TaskGroup};
use echo_service::modules::{Registry, RpcModule, TelemetryModule};
use echo_service::observability::{Telemetry, TelemetryError, TelemetryOption};
use echo_service::server::{Server, ServerConfig, ServerError, ServerOption};

pub const APP: &str = "echotest";

/// Ask the OS for a port that is free right now.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn write_config(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Temp dir holding `config.toml` with `content`, and settings reading it.
pub fn settings_with(content: &str) -> (tempfile::TempDir, PathBuf, Settings) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    write_config(&path, content);
    let mut settings = Settings::new(APP);
    settings.set_file(&path);
    (dir, path, settings)
}

pub fn registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new(APP));
    registry.add(Arc::new(RpcModule::new()));
    registry.add(Arc::new(TelemetryModule::new()));
    registry
}

pub async fn wait_for_state(rx: &mut watch::Receiver<LifecycleState>, state: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for lifecycle state")
        .expect("orchestrator went away");
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}

/// What the mock collaborators observed.
#[derive(Default)]
pub struct Probe {
    events: Mutex<Vec<String>>,
    ports: Mutex<Vec<u16>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    servers_built: AtomicUsize,
    handlers_built: AtomicUsize,
    handler_reloads: AtomicUsize,
}

impl Probe {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn servers_built(&self) -> usize {
        self.servers_built.load(Ordering::SeqCst)
    }

    pub fn handlers_built(&self) -> usize {
        self.handlers_built.load(Ordering::SeqCst)
    }

    pub fn handler_reloads(&self) -> usize {
        self.handler_reloads.load(Ordering::SeqCst)
    }
}

pub struct MockHandler {
    probe: Arc<Probe>,
}

impl ServiceHandler for MockHandler {
    fn service(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            name: "mock.v1".to_string(),
            methods: Vec::new(),
            router: Router::new(),
        }
    }

    fn reload(&self) -> Result<(), HandlerError> {
        self.probe.handler_reloads.fetch_add(1, Ordering::SeqCst);
        self.probe.record("handler.reload");
        Ok(())
    }

    fn close(&self) -> Result<(), HandlerError> {
        self.probe.record("handler.close");
        Ok(())
    }
}

pub struct MockTelemetry {
    probe: Arc<Probe>,
}

impl Telemetry for MockTelemetry {
    fn flush(&self) {
        self.probe.record("telemetry.flush");
    }
}

pub struct MockServer {
    probe: Arc<Probe>,
    stop: Shutdown,
}

impl Server for MockServer {
    async fn start(&self, ready: oneshot::Sender<()>) -> Result<(), ServerError> {
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        self.probe.record("server.start");
        let mut stop = self.stop.subscribe();
        let _ = ready.send(());
        stop.recv().await;
        // leave room for an overlapping instance to show up
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        self.probe.record("server.exit");
        Ok(())
    }

    async fn stop(&self, _graceful: bool) -> Result<(), ServerError> {
        self.probe.record("server.stop");
        self.stop.trigger();
        Ok(())
    }
}

/// Assembly recording every interaction in a shared [`Probe`].
#[derive(Default)]
pub struct MockAssembly {
    pub probe: Arc<Probe>,
}

impl Assembly for MockAssembly {
    type Handler = MockHandler;
    type Telemetry = MockTelemetry;
    type Server = MockServer;

    fn handler(&self) -> Result<MockHandler, HandlerError> {
        self.probe.handlers_built.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandler {
            probe: self.probe.clone(),
        })
    }

    fn telemetry(
        &self,
        _options: Vec<TelemetryOption>,
        _tasks: &mut TaskGroup,
    ) -> Result<MockTelemetry, TelemetryError> {
        self.probe.record("telemetry.setup");
        Ok(MockTelemetry {
            probe: self.probe.clone(),
        })
    }

    fn server(&self, options: Vec<ServerOption>) -> Result<MockServer, ServerError> {
        // same validation the real server applies
        ServerConfig::from_options(options.clone())?;
        self.probe.servers_built.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = options.iter().find_map(|o| match o {
            ServerOption::Port(p) => Some(*p),
            _ => None,
        }) {
            self.probe.ports.lock().unwrap().push(port);
        }
        Ok(MockServer {
            probe: self.probe.clone(),
            stop: Shutdown::new(),
        })
    }
}
