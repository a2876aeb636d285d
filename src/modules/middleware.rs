//! HTTP middleware module.
//!
//! Produces the gateway middleware chain. Entries are appended in a fixed
//! order; the first entry is the outermost layer.

use std::collections::BTreeMap;

use arc_swap::ArcSwapOption;
use serde::Deserialize;

use crate::config::Settings;
use crate::modules::{Module, ModuleError, Target, TargetKind};
use crate::server::{CorsOptions, HstsOptions, MetadataOptions, Middleware, OtelOptions};

pub const NAME: &str = "middleware";

/// Highest accepted gzip compression level.
pub const MAX_GZIP_LEVEL: u32 = 9;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateSettings {
    /// Sustained requests per second.
    pub limit: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MiddlewareSettings {
    pub proxy_protocol: bool,
    pub panic_recovery: bool,
    /// Compression level, 0 disables compression.
    pub gzip: u32,
    pub headers: BTreeMap<String, String>,
    pub metadata: Option<MetadataOptions>,
    pub cors: Option<CorsOptions>,
    pub otel: Option<OtelOptions>,
    pub hsts: Option<HstsOptions>,
    pub rate: Option<RateSettings>,
}

impl MiddlewareSettings {
    fn chain(&self) -> Result<Vec<Middleware>, ModuleError> {
        let mut chain = Vec::new();
        if self.proxy_protocol {
            chain.push(Middleware::ProxyHeaders);
        }
        if self.gzip > MAX_GZIP_LEVEL {
            return Err(ModuleError::config(
                NAME,
                format!("gzip level must be between 0 and {MAX_GZIP_LEVEL}, got {}", self.gzip),
            ));
        }
        if self.gzip > 0 {
            chain.push(Middleware::Gzip(self.gzip));
        }
        if !self.headers.is_empty() {
            chain.push(Middleware::Headers(self.headers.clone()));
        }
        if let Some(metadata) = &self.metadata {
            chain.push(Middleware::Metadata(metadata.clone()));
        }
        if let Some(cors) = &self.cors {
            chain.push(Middleware::Cors(cors.clone()));
        }
        if let Some(otel) = self.otel.as_ref().filter(|o| o.enabled) {
            chain.push(Middleware::Otel(otel.clone()));
        }
        if let Some(hsts) = &self.hsts {
            chain.push(Middleware::Hsts(hsts.clone()));
        }
        if let Some(rate) = self.rate {
            if rate.limit == 0 {
                return Err(ModuleError::config(NAME, "rate limit must be greater than zero"));
            }
            chain.push(Middleware::RateLimit {
                limit: rate.limit,
                burst: rate.burst.max(1),
            });
        }
        if self.panic_recovery {
            chain.push(Middleware::PanicRecovery);
        }
        Ok(chain)
    }
}

/// Middleware settings, configured only when the subtree is present.
pub struct MiddlewareModule {
    key: String,
    settings: ArcSwapOption<MiddlewareSettings>,
}

impl MiddlewareModule {
    pub fn new() -> Self {
        Self::at(NAME)
    }

    pub fn at(key: &str) -> Self {
        Self {
            key: key.to_string(),
            settings: ArcSwapOption::empty(),
        }
    }

    /// Whether the last load found a middleware subtree.
    pub fn is_configured(&self) -> bool {
        self.settings.load().is_some()
    }
}

impl Default for MiddlewareModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for MiddlewareModule {
    fn name(&self) -> &str {
        NAME
    }

    fn load(&self, settings: &Settings) -> Result<(), ModuleError> {
        let loaded = settings
            .section::<MiddlewareSettings>(&self.key)
            .map_err(|source| ModuleError::Settings {
                module: NAME.to_string(),
                source,
            })?;
        self.settings.store(loaded.map(Into::into));
        Ok(())
    }

    fn customize(&self, target: Target<'_>) -> Result<(), ModuleError> {
        let actual = target.kind();
        let Target::Middleware(handlers) = target else {
            return Err(ModuleError::mismatch(NAME, TargetKind::Middleware, actual));
        };
        if let Some(settings) = &*self.settings.load() {
            handlers.extend(settings.chain()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerOption;

    fn loaded(content: &str) -> MiddlewareModule {
        let mut settings = Settings::new("mw-test");
        settings.load_str(content).unwrap();
        let module = MiddlewareModule::at("http.middleware");
        module.load(&settings).unwrap();
        module
    }

    fn chain(module: &MiddlewareModule) -> Result<Vec<Middleware>, ModuleError> {
        let mut handlers = Vec::new();
        module.customize(Target::Middleware(&mut handlers))?;
        Ok(handlers)
    }

    #[test]
    fn absent_subtree_contributes_nothing() {
        let module = loaded("");
        assert!(!module.is_configured());
        assert!(chain(&module).unwrap().is_empty());
    }

    #[test]
    fn chain_follows_the_fixed_order() {
        let module = loaded(
            r#"
            [http.middleware]
            panic_recovery = true
            proxy_protocol = true
            gzip = 5
            headers = { x-served-by = "echo" }
            rate = { limit = 10, burst = 20 }
            hsts = { max_age = 60 }
            cors = { allowed_origins = ["*"] }
            otel = { enabled = true }
            "#,
        );
        let kinds: Vec<&str> = chain(&module)
            .unwrap()
            .iter()
            .map(|m| match m {
                Middleware::ProxyHeaders => "proxy",
                Middleware::Gzip(_) => "gzip",
                Middleware::Headers(_) => "headers",
                Middleware::Metadata(_) => "metadata",
                Middleware::Cors(_) => "cors",
                Middleware::Otel(_) => "otel",
                Middleware::Hsts(_) => "hsts",
                Middleware::RateLimit { .. } => "rate",
                Middleware::PanicRecovery => "recovery",
                Middleware::BuildInfo(_) => "build",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["proxy", "gzip", "headers", "cors", "otel", "hsts", "rate", "recovery"]
        );
    }

    #[test]
    fn disabled_otel_is_skipped() {
        let module = loaded("[http.middleware.otel]\nenabled = false\n");
        assert!(module.is_configured());
        assert!(chain(&module).unwrap().is_empty());
    }

    #[test]
    fn gzip_level_above_nine_is_rejected() {
        let module = loaded("[http.middleware]\ngzip = 12\n");
        assert!(matches!(chain(&module), Err(ModuleError::Config { .. })));
    }

    #[test]
    fn wrong_target_leaves_it_untouched() {
        let module = loaded("[http.middleware]\npanic_recovery = true\n");
        let mut options: Vec<ServerOption> = vec![ServerOption::Reflection];
        let err = module.customize(Target::Server(&mut options)).unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(options.len(), 1);
    }
}
