//! Metrics collection.
//!
//! # Metrics
//! - `rpc_requests_total` (counter): requests by handler, method, status
//! - `rpc_request_duration_seconds` (histogram): latency distribution
//! - `rpc_rate_limited_total` (counter): rejected requests by limiter scope
//! - `process_uptime_seconds`, `runtime_workers`, `runtime_alive_tasks`,
//!   `host_cpus`, `host_load_average_1m` (gauges): sampled by the
//!   instrumentation when enabled
//!
//! Recording is a no-op while no instrumentation is active.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

pub fn record_request(handler: &str, method: &str, status: u16, start: Instant) {
    counter!(
        "rpc_requests_total",
        "handler" => handler.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "rpc_request_duration_seconds",
        "handler" => handler.to_string(),
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("rpc_rate_limited_total", "scope" => scope).increment(1);
}

/// Sample tokio runtime gauges for the current runtime.
pub fn sample_runtime(started: Instant) {
    gauge!("process_uptime_seconds").set(started.elapsed().as_secs_f64());
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let runtime = handle.metrics();
        gauge!("runtime_workers").set(runtime.num_workers() as f64);
        gauge!("runtime_alive_tasks").set(runtime.num_alive_tasks() as f64);
    }
}

/// Sample host gauges. The load average is only available on Linux.
pub fn sample_host() {
    if let Ok(cpus) = std::thread::available_parallelism() {
        gauge!("host_cpus").set(cpus.get() as f64);
    }
    let load = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|content| content.split_whitespace().next().map(str::to_owned))
        .and_then(|first| first.parse::<f64>().ok());
    if let Some(load) = load {
        gauge!("host_load_average_1m").set(load);
    }
}
