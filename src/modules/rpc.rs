//! RPC server module.
//!
//! Owns the `rpc` subtree and the nested `rpc.tls` and
//! `rpc.http.middleware` modules, and projects them into server options.

use std::net::IpAddr;
use std::path::PathBuf;

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::config::{Param, ParamValue, Settings};
use crate::modules::{
    load_section, MiddlewareModule, Module, ModuleError, Provider, Target, TargetKind, TlsModule,
};
use crate::server::{
    GatewayOption, Middleware, ResourceLimits, ServerOption, NETWORK_INTERFACE_ALL,
    NETWORK_INTERFACE_LOCAL,
};

pub const NAME: &str = "rpc";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9090;

/// Media type served as indented JSON by the HTTP gateway.
pub const PRETTY_JSON_MEDIA_TYPE: &str = "application/json+pretty";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewaySettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcSettings {
    /// TCP port; 0 when serving on a unix socket.
    pub port: u16,
    /// `localhost`, `all`, or an IP address.
    pub network_interface: String,
    pub unix_socket: String,
    pub input_validation: bool,
    pub reflection: bool,
    pub resource_limits: Option<ResourceLimits>,
    pub http: GatewaySettings,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            network_interface: NETWORK_INTERFACE_LOCAL.to_string(),
            unix_socket: String::new(),
            input_validation: false,
            reflection: false,
            resource_limits: None,
            http: GatewaySettings::default(),
        }
    }
}

pub struct RpcModule {
    settings: ArcSwap<RpcSettings>,
    tls: TlsModule,
    middleware: MiddlewareModule,
}

impl RpcModule {
    pub fn new() -> Self {
        Self {
            settings: ArcSwap::from_pointee(RpcSettings::default()),
            tls: TlsModule::at("rpc.tls"),
            middleware: MiddlewareModule::at("rpc.http.middleware"),
        }
    }

    pub fn settings(&self) -> RpcSettings {
        (**self.settings.load()).clone()
    }

    pub fn tls(&self) -> &TlsModule {
        &self.tls
    }

    fn gateway_options(&self) -> Result<Vec<GatewayOption>, ModuleError> {
        let mut options = vec![
            GatewayOption::HandlerName("http-gateway".to_string()),
            GatewayOption::PrettyJson(PRETTY_JSON_MEDIA_TYPE.to_string()),
        ];
        if self.middleware.is_configured() {
            let mut chain = Vec::new();
            self.middleware.customize(Target::Middleware(&mut chain))?;
            options.extend(chain.into_iter().map(GatewayOption::Middleware));
            options.push(GatewayOption::Middleware(Middleware::PanicRecovery));
        }
        Ok(options)
    }
}

impl Default for RpcModule {
    fn default() -> Self {
        Self::new()
    }
}

fn check_interface(value: &str) -> Result<(), ModuleError> {
    if value == NETWORK_INTERFACE_LOCAL
        || value == NETWORK_INTERFACE_ALL
        || value.parse::<IpAddr>().is_ok()
    {
        return Ok(());
    }
    Err(ModuleError::config(
        NAME,
        format!("invalid network interface '{value}'"),
    ))
}

impl Module for RpcModule {
    fn name(&self) -> &str {
        NAME
    }

    fn load(&self, settings: &Settings) -> Result<(), ModuleError> {
        let loaded: RpcSettings = load_section(NAME, settings, NAME)?;
        self.settings.store(loaded.into());
        self.tls.load(settings)?;
        self.middleware.load(settings)
    }

    fn flags(&self, app_name: &str) -> Vec<Param> {
        vec![
            Param::new(
                "port",
                "TCP port to use for the server",
                "rpc.port",
                ParamValue::Int(i64::from(DEFAULT_PORT)),
            )
            .short('p'),
            Param::new(
                "http",
                "enable HTTP access",
                "rpc.http.enabled",
                ParamValue::Bool(false),
            )
            .short('H'),
            Param::new(
                "tls",
                "enable secure communications using TLS with provided credentials",
                "rpc.tls.enabled",
                ParamValue::Bool(false),
            ),
            Param::new(
                "tls-ca",
                "TLS custom certificate authority (path to PEM file)",
                "rpc.tls.custom_ca",
                ParamValue::List(Vec::new()),
            ),
            Param::new(
                "tls-cert",
                "TLS certificate (path to PEM file)",
                "rpc.tls.cert",
                ParamValue::Str(format!("/etc/{app_name}/tls/tls.crt")),
            ),
            Param::new(
                "tls-key",
                "TLS private key (path to PEM file)",
                "rpc.tls.key",
                ParamValue::Str(format!("/etc/{app_name}/tls/tls.key")),
            ),
        ]
    }

    fn customize(&self, target: Target<'_>) -> Result<(), ModuleError> {
        let actual = target.kind();
        let Target::Server(options) = target else {
            return Err(ModuleError::mismatch(NAME, TargetKind::Server, actual));
        };

        let settings = self.settings.load();
        if settings.port != 0 && !settings.unix_socket.is_empty() {
            return Err(ModuleError::config(
                NAME,
                "port and unix socket can't be used simultaneously",
            ));
        }
        if settings.port == 0 && settings.unix_socket.is_empty() {
            return Err(ModuleError::config(
                NAME,
                "either port or unix socket is required",
            ));
        }

        let mut added = vec![ServerOption::PanicRecovery];
        if let Some(limits) = settings.resource_limits {
            added.push(ServerOption::ResourceLimits(limits));
        }
        if settings.input_validation {
            added.push(ServerOption::InputValidation);
        }
        if settings.reflection {
            added.push(ServerOption::Reflection);
        }
        if settings.port != 0 {
            check_interface(&settings.network_interface)?;
            added.push(ServerOption::Port(settings.port));
            added.push(ServerOption::NetworkInterface(
                settings.network_interface.clone(),
            ));
        } else {
            added.push(ServerOption::UnixSocket(PathBuf::from(&settings.unix_socket)));
        }

        if self.tls.is_enabled() {
            added.push(ServerOption::Tls(self.tls.provide()?));
        }
        if settings.http.enabled {
            added.push(ServerOption::HttpGateway(self.gateway_options()?));
        }

        options.extend(added);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::instrumentation::TelemetryOption;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn loaded(content: &str) -> RpcModule {
        let mut settings = Settings::new("rpc-test");
        settings.load_str(content).unwrap();
        let module = RpcModule::new();
        module.load(&settings).unwrap();
        module
    }

    fn options(module: &RpcModule) -> Result<Vec<ServerOption>, ModuleError> {
        let mut options = Vec::new();
        module.customize(Target::Server(&mut options))?;
        Ok(options)
    }

    #[test]
    fn empty_config_yields_usable_defaults() {
        let module = loaded("");
        let settings = module.settings();
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.network_interface, "localhost");
        assert!(options(&module).is_ok());
    }

    #[test]
    fn port_config_produces_port_and_recovery_without_tls() {
        let module = loaded("[rpc]\nport = 9090\n");
        let options = options(&module).unwrap();

        assert!(matches!(options[0], ServerOption::PanicRecovery));
        assert!(options.iter().any(|o| matches!(o, ServerOption::Port(9090))));
        assert!(options
            .iter()
            .any(|o| matches!(o, ServerOption::NetworkInterface(ni) if ni == "localhost")));
        assert!(!options.iter().any(|o| matches!(o, ServerOption::Tls(_))));
        assert!(!options.iter().any(|o| matches!(o, ServerOption::HttpGateway(_))));
    }

    #[test]
    fn port_and_unix_socket_are_exclusive() {
        let module = loaded("[rpc]\nport = 9090\nunix_socket = \"/tmp/x.sock\"\n");
        let mut options = vec![ServerOption::Reflection];
        let err = module.customize(Target::Server(&mut options)).unwrap_err();

        assert!(matches!(err, ModuleError::Config { ref reason, .. } if reason.contains("simultaneously")));
        assert!(!err.is_contract_violation());
        assert_eq!(options.len(), 1);
    }

    #[test]
    fn port_or_socket_is_required() {
        let module = loaded("[rpc]\nport = 0\n");
        let err = options(&module).unwrap_err();
        assert!(matches!(err, ModuleError::Config { ref reason, .. } if reason.contains("required")));
    }

    #[test]
    fn unix_socket_requires_port_zero() {
        let module = loaded("[rpc]\nport = 0\nunix_socket = \"/tmp/echo.sock\"\n");
        let options = options(&module).unwrap();
        assert!(options
            .iter()
            .any(|o| matches!(o, ServerOption::UnixSocket(p) if p == &PathBuf::from("/tmp/echo.sock"))));
        assert!(!options.iter().any(|o| matches!(o, ServerOption::Port(_))));
    }

    #[test]
    fn invalid_network_interface_is_rejected() {
        let module = loaded("[rpc]\nnetwork_interface = \"eth-zero\"\n");
        assert!(matches!(options(&module), Err(ModuleError::Config { .. })));
    }

    #[test]
    fn optional_features_are_appended() {
        let module = loaded(
            "[rpc]\ninput_validation = true\nreflection = true\n\
             [rpc.resource_limits]\nmax_concurrent = 5\n",
        );
        let options = options(&module).unwrap();
        assert!(options.iter().any(|o| matches!(o, ServerOption::InputValidation)));
        assert!(options.iter().any(|o| matches!(o, ServerOption::Reflection)));
        assert!(options
            .iter()
            .any(|o| matches!(o, ServerOption::ResourceLimits(l) if l.max_concurrent == 5)));
    }

    #[test]
    fn tls_material_is_provided_when_enabled() {
        let module = loaded(&format!(
            "[rpc.tls]\nenabled = true\ncert = \"{}\"\nkey = \"{}\"\n",
            STANDARD.encode("cert"),
            STANDARD.encode("key"),
        ));
        let options = options(&module).unwrap();
        let material = options.iter().find_map(|o| match o {
            ServerOption::Tls(material) => Some(material),
            _ => None,
        });
        assert_eq!(material.map(|m| m.certificate.as_slice()), Some(&b"cert"[..]));
    }

    #[test]
    fn gateway_includes_middleware_followed_by_recovery() {
        let module = loaded(
            "[rpc.http]\nenabled = true\n[rpc.http.middleware]\ngzip = 4\n",
        );
        let options = options(&module).unwrap();
        let gateway = options
            .iter()
            .find_map(|o| match o {
                ServerOption::HttpGateway(gateway) => Some(gateway),
                _ => None,
            })
            .unwrap();

        assert!(matches!(&gateway[0], GatewayOption::HandlerName(n) if n == "http-gateway"));
        assert!(matches!(&gateway[1], GatewayOption::PrettyJson(t) if t == PRETTY_JSON_MEDIA_TYPE));
        assert!(matches!(gateway[2], GatewayOption::Middleware(Middleware::Gzip(4))));
        assert!(matches!(
            gateway.last(),
            Some(GatewayOption::Middleware(Middleware::PanicRecovery))
        ));
    }

    #[test]
    fn gateway_without_middleware_has_no_recovery_entry() {
        let module = loaded("[rpc.http]\nenabled = true\n");
        let options = options(&module).unwrap();
        let gateway_len = options.iter().find_map(|o| match o {
            ServerOption::HttpGateway(gateway) => Some(gateway.len()),
            _ => None,
        });
        assert_eq!(gateway_len, Some(2));
    }

    #[test]
    fn telemetry_target_is_a_contract_violation() {
        let module = loaded("");
        let mut options: Vec<TelemetryOption> = Vec::new();
        let err = module.customize(Target::Telemetry(&mut options)).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::TargetMismatch {
                expected: TargetKind::Server,
                actual: TargetKind::Telemetry,
                ..
            }
        ));
        assert!(options.is_empty());
    }

    #[test]
    fn flags_use_the_app_name_for_tls_paths() {
        let flags = RpcModule::new().flags("echoctl");
        let cert = flags.iter().find(|p| p.name == "tls-cert").unwrap();
        assert_eq!(cert.default, ParamValue::Str("/etc/echoctl/tls/tls.crt".into()));
        let port = flags.iter().find(|p| p.name == "port").unwrap();
        assert_eq!(port.short, Some('p'));
        assert_eq!(port.flag_key, "rpc.port");
    }
}
