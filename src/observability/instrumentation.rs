//! Telemetry pipeline built from the `otel` module's options.
//!
//! A single forwarding recorder is installed as the global `metrics`
//! recorder the first time instrumentation is set up. Each run builds a
//! fresh Prometheus recorder and swaps it in; `flush` swaps it back out, so
//! a reload never leaves two pipelines collecting at once.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::lifecycle::tasks::BoxError;
use crate::lifecycle::{Shutdown, TaskGroup};
use crate::observability::metrics as samples;

/// How often host gauges are sampled when enabled.
pub const HOST_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Directives produced by the `otel` module.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryOption {
    ServiceName(String),
    ServiceVersion(String),
    HostMetrics,
    /// Sample runtime gauges at this period.
    RuntimeMetrics(Duration),
    ResourceAttributes(BTreeMap<String, String>),
    /// Serve a Prometheus scrape endpoint on this address.
    PrometheusExporter(SocketAddr),
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build the metrics pipeline")]
    Build(#[from] BuildError),
}

/// An instrumentation pipeline the lifecycle flushes on reload and close.
pub trait Telemetry: Send + Sync {
    /// Push out pending data and stop background collection.
    fn flush(&self);
}

static ACTIVE: ArcSwapOption<PrometheusRecorder> = ArcSwapOption::const_empty();
static INSTALLED: OnceLock<()> = OnceLock::new();

/// Global recorder delegating to whichever pipeline is active.
struct Forwarding;

impl Recorder for Forwarding {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        if let Some(recorder) = &*ACTIVE.load() {
            recorder.describe_counter(key, unit, description);
        }
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        if let Some(recorder) = &*ACTIVE.load() {
            recorder.describe_gauge(key, unit, description);
        }
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        if let Some(recorder) = &*ACTIVE.load() {
            recorder.describe_histogram(key, unit, description);
        }
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        match &*ACTIVE.load() {
            Some(recorder) => recorder.register_counter(key, metadata),
            None => Counter::noop(),
        }
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        match &*ACTIVE.load() {
            Some(recorder) => recorder.register_gauge(key, metadata),
            None => Gauge::noop(),
        }
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        match &*ACTIVE.load() {
            Some(recorder) => recorder.register_histogram(key, metadata),
            None => Histogram::noop(),
        }
    }
}

fn install_forwarding() {
    INSTALLED.get_or_init(|| {
        if metrics::set_global_recorder(Forwarding).is_err() {
            tracing::warn!("a global metrics recorder is already installed, metrics will not be exported");
        }
    });
}

pub struct Instrumentation {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    shutdown: Shutdown,
    started: Instant,
    host: bool,
    runtime: bool,
}

impl Instrumentation {
    /// Build the pipeline and spawn its background tasks into `tasks`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn setup(options: Vec<TelemetryOption>, tasks: &mut TaskGroup) -> Result<Self, TelemetryError> {
        let mut builder = PrometheusBuilder::new();
        let mut exporter = None;
        let mut host = false;
        let mut runtime = None;

        for option in options {
            match option {
                TelemetryOption::ServiceName(name) => {
                    builder = builder.add_global_label("service_name", name);
                }
                TelemetryOption::ServiceVersion(version) => {
                    builder = builder.add_global_label("service_version", version);
                }
                TelemetryOption::ResourceAttributes(attributes) => {
                    for (key, value) in attributes {
                        builder = builder.add_global_label(key, value);
                    }
                }
                TelemetryOption::HostMetrics => host = true,
                TelemetryOption::RuntimeMetrics(period) => runtime = Some(period),
                TelemetryOption::PrometheusExporter(addr) => exporter = Some(addr),
            }
        }

        let shutdown = Shutdown::new();
        let recorder = match exporter {
            Some(addr) => {
                let (recorder, serve) = builder.with_http_listener(addr).build()?;
                let mut stop = shutdown.subscribe();
                tasks.spawn("metrics-exporter", async move {
                    tokio::select! {
                        result = serve => result.map_err(|e| -> BoxError { format!("metrics exporter failed: {e:?}").into() }),
                        _ = stop.recv() => Ok::<(), BoxError>(()),
                    }
                });
                tracing::info!(address = %addr, "serving Prometheus metrics");
                recorder
            }
            None => builder.build_recorder(),
        };

        let handle = recorder.handle();
        let recorder = Arc::new(recorder);
        install_forwarding();
        ACTIVE.store(Some(recorder.clone()));

        let started = Instant::now();
        if host {
            spawn_sampler(tasks, "host-metrics", HOST_METRICS_INTERVAL, &shutdown, samples::sample_host);
        }
        if let Some(period) = runtime {
            spawn_sampler(tasks, "runtime-metrics", period, &shutdown, move || {
                samples::sample_runtime(started)
            });
        }

        Ok(Self {
            recorder,
            handle,
            shutdown,
            started,
            host,
            runtime: runtime.is_some(),
        })
    }

    /// Current metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn is_active(&self) -> bool {
        match &*ACTIVE.load() {
            Some(active) => Arc::ptr_eq(active, &self.recorder),
            None => false,
        }
    }
}

impl Telemetry for Instrumentation {
    fn flush(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        if self.host {
            samples::sample_host();
        }
        if self.runtime {
            samples::sample_runtime(self.started);
        }
        self.handle.run_upkeep();
        self.shutdown.trigger();
        if self.is_active() {
            ACTIVE.store(None);
        }
        tracing::debug!("telemetry flushed");
    }
}

fn spawn_sampler<F>(tasks: &mut TaskGroup, name: &'static str, period: Duration, shutdown: &Shutdown, sample: F)
where
    F: Fn() + Send + 'static,
{
    let mut stop = shutdown.subscribe();
    tasks.spawn(name, async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => sample(),
                _ = stop.recv() => return Ok::<(), BoxError>(()),
            }
        }
    });
}
