//! Telemetry module.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::config::Settings;
use crate::modules::{load_section, Module, ModuleError, Target, TargetKind};
use crate::observability::instrumentation::TelemetryOption;

pub const NAME: &str = "otel";

/// Only exporter protocol supported by the instrumentation.
pub const PROTOCOL_PROMETHEUS: &str = "prometheus";

/// Sampling interval for runtime metrics.
pub const RUNTIME_METRICS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorSettings {
    pub endpoint: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtelSettings {
    pub enabled: bool,
    pub service_name: String,
    pub service_version: String,
    pub collector: CollectorSettings,
    pub metrics_host: bool,
    pub metrics_runtime: bool,
    pub attributes: BTreeMap<String, toml::Value>,
}

impl Default for OtelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: env!("CARGO_PKG_NAME").to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            collector: CollectorSettings::default(),
            metrics_host: false,
            metrics_runtime: false,
            attributes: BTreeMap::new(),
        }
    }
}

impl OtelSettings {
    fn options(&self) -> Result<Vec<TelemetryOption>, ModuleError> {
        let mut options = vec![
            TelemetryOption::ServiceName(self.service_name.clone()),
            TelemetryOption::ServiceVersion(self.service_version.clone()),
        ];
        if self.metrics_host {
            options.push(TelemetryOption::HostMetrics);
        }
        if self.metrics_runtime {
            options.push(TelemetryOption::RuntimeMetrics(RUNTIME_METRICS_INTERVAL));
        }
        if !self.attributes.is_empty() {
            let attributes = self
                .attributes
                .iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect();
            options.push(TelemetryOption::ResourceAttributes(attributes));
        }
        if !self.collector.endpoint.is_empty() {
            let protocol = if self.collector.protocol.is_empty() {
                PROTOCOL_PROMETHEUS
            } else {
                self.collector.protocol.as_str()
            };
            if protocol != PROTOCOL_PROMETHEUS {
                return Err(ModuleError::config(
                    NAME,
                    format!("unsupported collector protocol '{protocol}'"),
                ));
            }
            let addr: SocketAddr = self.collector.endpoint.parse().map_err(|_| {
                ModuleError::config(
                    NAME,
                    format!("invalid collector endpoint '{}'", self.collector.endpoint),
                )
            })?;
            options.push(TelemetryOption::PrometheusExporter(addr));
        }
        Ok(options)
    }
}

pub struct TelemetryModule {
    settings: ArcSwap<OtelSettings>,
}

impl TelemetryModule {
    pub fn new() -> Self {
        Self {
            settings: ArcSwap::from_pointee(OtelSettings::default()),
        }
    }

    pub fn settings(&self) -> OtelSettings {
        (**self.settings.load()).clone()
    }
}

impl Default for TelemetryModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for TelemetryModule {
    fn name(&self) -> &str {
        NAME
    }

    fn load(&self, settings: &Settings) -> Result<(), ModuleError> {
        let loaded: OtelSettings = load_section(NAME, settings, NAME)?;
        self.settings.store(loaded.into());
        Ok(())
    }

    /// Disabled telemetry contributes no options.
    fn customize(&self, target: Target<'_>) -> Result<(), ModuleError> {
        let actual = target.kind();
        let Target::Telemetry(options) = target else {
            return Err(ModuleError::mismatch(NAME, TargetKind::Telemetry, actual));
        };
        let settings = self.settings.load();
        if settings.enabled {
            options.extend(settings.options()?);
        }
        Ok(())
    }
}
