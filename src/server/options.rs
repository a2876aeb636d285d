//! Server option lists and the configuration they resolve to.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::Deserialize;

use crate::build_info::VersionInfo;
use crate::handler::ServiceDescriptor;
use crate::modules::TlsMaterial;
use crate::server::ServerError;

/// Listen on the loopback interface only.
pub const NETWORK_INTERFACE_LOCAL: &str = "localhost";
/// Listen on every interface.
pub const NETWORK_INTERFACE_ALL: &str = "all";

pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Limits applied to every request served.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceLimits {
    /// Requests processed at the same time; 0 disables the limit.
    pub max_concurrent: u32,
    /// Requests per second across all clients; 0 disables the limit.
    pub rate: u32,
    pub max_body_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            rate: 0,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsOptions {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Seconds preflight responses may be cached.
    pub max_age: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HstsOptions {
    pub max_age: u64,
    pub include_subdomains: bool,
    pub preload: bool,
}

impl Default for HstsOptions {
    fn default() -> Self {
        Self {
            max_age: 31_536_000,
            include_subdomains: false,
            preload: false,
        }
    }
}

impl HstsOptions {
    pub fn header_value(&self) -> String {
        let mut value = format!("max-age={}", self.max_age);
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }
}

/// Request headers copied into the request metadata.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataOptions {
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OtelOptions {
    pub enabled: bool,
    /// Log request and response sizes.
    pub network_events: bool,
    /// Response header carrying the request id.
    pub trace_header: String,
    /// Paths excluded from request metrics.
    pub omit_paths: Vec<String>,
}

/// HTTP gateway middleware. The first entry of a chain wraps all others.
#[derive(Debug, Clone, PartialEq)]
pub enum Middleware {
    /// Trust `Forwarded`/`X-Forwarded-For`/`X-Real-IP` for the client address.
    ProxyHeaders,
    Gzip(u32),
    Headers(BTreeMap<String, String>),
    Metadata(MetadataOptions),
    Cors(CorsOptions),
    Otel(OtelOptions),
    Hsts(HstsOptions),
    RateLimit { limit: u32, burst: u32 },
    PanicRecovery,
    BuildInfo(VersionInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOption {
    Middleware(Middleware),
    /// Label used for the gateway in logs and metrics.
    HandlerName(String),
    /// Requests accepting this media type get indented JSON responses.
    PrettyJson(String),
}

/// Directives consumed by [`ServerConfig::from_options`].
#[derive(Debug, Clone)]
pub enum ServerOption {
    PanicRecovery,
    ResourceLimits(ResourceLimits),
    InputValidation,
    Reflection,
    Port(u16),
    NetworkInterface(String),
    UnixSocket(PathBuf),
    Tls(TlsMaterial),
    /// Enable the HTTP gateway with the given options.
    HttpGateway(Vec<GatewayOption>),
    /// Extra options for the gateway; ignored when it is not enabled.
    HttpGatewayOptions(Vec<GatewayOption>),
    ServiceProvider(ServiceDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { ip: IpAddr, port: u16 },
    Unix(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub handler_name: String,
    pub pretty_json: Option<String>,
    pub middleware: Vec<Middleware>,
}

impl GatewayConfig {
    fn apply(&mut self, options: Vec<GatewayOption>) {
        for option in options {
            match option {
                GatewayOption::Middleware(m) => self.middleware.push(m),
                GatewayOption::HandlerName(name) => self.handler_name = name,
                GatewayOption::PrettyJson(media_type) => self.pretty_json = Some(media_type),
            }
        }
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub panic_recovery: bool,
    pub limits: Option<ResourceLimits>,
    pub input_validation: bool,
    pub reflection: bool,
    pub endpoint: Endpoint,
    pub tls: Option<TlsMaterial>,
    pub gateway: Option<GatewayConfig>,
    pub services: Vec<ServiceDescriptor>,
}

pub(crate) fn resolve_interface(value: &str) -> Result<IpAddr, ServerError> {
    match value {
        "" | NETWORK_INTERFACE_LOCAL => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        NETWORK_INTERFACE_ALL => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        other => other
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid network interface '{other}'"))),
    }
}

impl ServerConfig {
    /// Fold an option list into a configuration. Later options override
    /// earlier ones of the same kind.
    pub fn from_options(options: Vec<ServerOption>) -> Result<Self, ServerError> {
        let mut port = None;
        let mut interface = String::new();
        let mut socket = None;
        let mut extra_gateway = Vec::new();
        let mut config = ServerConfig {
            panic_recovery: false,
            limits: None,
            input_validation: false,
            reflection: false,
            endpoint: Endpoint::Tcp {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
            },
            tls: None,
            gateway: None,
            services: Vec::new(),
        };

        for option in options {
            match option {
                ServerOption::PanicRecovery => config.panic_recovery = true,
                ServerOption::ResourceLimits(limits) => config.limits = Some(limits),
                ServerOption::InputValidation => config.input_validation = true,
                ServerOption::Reflection => config.reflection = true,
                ServerOption::Port(p) => port = Some(p),
                ServerOption::NetworkInterface(ni) => interface = ni,
                ServerOption::UnixSocket(path) => socket = Some(path),
                ServerOption::Tls(material) => config.tls = Some(material),
                ServerOption::HttpGateway(gateway) => {
                    let mut resolved = GatewayConfig::default();
                    resolved.apply(gateway);
                    config.gateway = Some(resolved);
                }
                ServerOption::HttpGatewayOptions(gateway) => extra_gateway.extend(gateway),
                ServerOption::ServiceProvider(service) => config.services.push(service),
            }
        }

        if let Some(gateway) = config.gateway.as_mut() {
            gateway.apply(extra_gateway);
        }

        config.endpoint = match (port, socket) {
            (Some(_), Some(_)) => {
                return Err(ServerError::Config(
                    "port and unix socket can't be used simultaneously".to_string(),
                ))
            }
            (None, None) => {
                return Err(ServerError::Config(
                    "either port or unix socket is required".to_string(),
                ))
            }
            (Some(port), None) => Endpoint::Tcp {
                ip: resolve_interface(&interface)?,
                port,
            },
            (None, Some(path)) => Endpoint::Unix(path),
        };

        if config.tls.is_some() && matches!(config.endpoint, Endpoint::Unix(_)) {
            return Err(ServerError::Config(
                "TLS is not supported on unix sockets".to_string(),
            ));
        }
        Ok(config)
    }
}
