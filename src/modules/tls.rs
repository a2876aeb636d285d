//! TLS credentials module.
//!
//! Certificates, keys and CA bundles are given either as base64-encoded PEM
//! or as a path to a PEM file; base64 is tried first.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use arc_swap::ArcSwap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::config::Settings;
use crate::modules::{load_section, Module, ModuleError, Provider, Target};

pub const NAME: &str = "tls";

/// Raw TLS settings as they appear in configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Trust the CAs installed on the local system.
    pub system_ca: bool,
    pub cert: String,
    pub key: String,
    pub custom_ca: Vec<String>,
    /// CAs used to authenticate clients.
    pub auth_ca: Vec<String>,
}

/// Fully expanded TLS byte material.
#[derive(Clone, Default, PartialEq)]
pub struct TlsMaterial {
    pub system_cas: bool,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub custom_cas: Vec<Vec<u8>>,
    pub auth_cas: Vec<Vec<u8>>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("system_cas", &self.system_cas)
            .field("certificate", &format_args!("{} bytes", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .field("custom_cas", &self.custom_cas.len())
            .field("auth_cas", &self.auth_cas.len())
            .finish()
    }
}

/// Provider of TLS material, usually nested under another module's key.
pub struct TlsModule {
    key: String,
    settings: ArcSwap<TlsSettings>,
    material: Mutex<Option<TlsMaterial>>,
}

impl TlsModule {
    pub fn new() -> Self {
        Self::at(NAME)
    }

    /// A TLS module reading its settings from `key` (e.g. `rpc.tls`).
    pub fn at(key: &str) -> Self {
        Self {
            key: key.to_string(),
            settings: ArcSwap::from_pointee(TlsSettings::default()),
            material: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> TlsSettings {
        (**self.settings.load()).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.load().enabled
    }

    fn expand(&self, settings: &TlsSettings) -> Result<TlsMaterial, ModuleError> {
        if settings.enabled && (settings.cert.is_empty() || settings.key.is_empty()) {
            return Err(ModuleError::config(
                NAME,
                "certificate and private key are required when TLS is enabled",
            ));
        }
        let optional = |value: &str| -> Result<Vec<u8>, ModuleError> {
            if value.is_empty() {
                Ok(Vec::new())
            } else {
                load_pem(value)
            }
        };
        Ok(TlsMaterial {
            system_cas: settings.system_ca,
            certificate: optional(&settings.cert)?,
            private_key: optional(&settings.key)?,
            custom_cas: settings
                .custom_ca
                .iter()
                .map(|ca| load_pem(ca))
                .collect::<Result<_, _>>()?,
            auth_cas: settings
                .auth_ca
                .iter()
                .map(|ca| load_pem(ca))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Default for TlsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for TlsModule {
    fn name(&self) -> &str {
        NAME
    }

    fn load(&self, settings: &Settings) -> Result<(), ModuleError> {
        let loaded: TlsSettings = load_section(NAME, settings, &self.key)?;
        self.settings.store(loaded.into());
        *self.material.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn customize(&self, _target: Target<'_>) -> Result<(), ModuleError> {
        Err(ModuleError::Unsupported {
            module: NAME.to_string(),
        })
    }
}

impl Provider for TlsModule {
    type Resource = TlsMaterial;

    /// Expansion happens once per load; later calls return a copy of the
    /// cached material.
    fn provide(&self) -> Result<TlsMaterial, ModuleError> {
        let mut cached = self.material.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(material) = cached.as_ref() {
            return Ok(material.clone());
        }
        let material = self.expand(&self.settings.load())?;
        *cached = Some(material.clone());
        Ok(material)
    }
}

fn load_pem(value: &str) -> Result<Vec<u8>, ModuleError> {
    if let Ok(data) = STANDARD.decode(value) {
        return Ok(data);
    }
    std::fs::read(Path::new(value)).map_err(|source| ModuleError::Resource {
        module: NAME.to_string(),
        reason: format!("failed to read PEM file {value}"),
        source,
    })
}
