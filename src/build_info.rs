//! Build and version details.
//!
//! The commit hash and build date are taken from the `ECHO_BUILD_CODE` and
//! `ECHO_BUILD_DATE` environment variables at compile time, when set.

use std::collections::BTreeMap;

use serde::Serialize;

/// Response header carrying the commit hash of the build.
pub const BUILD_CODE_HEADER: &str = "x-build-code";
/// Response header carrying the semantic version of the build.
pub const APP_VERSION_HEADER: &str = "x-app-version";

/// Information about the application collected at build time.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Commit identifier used to build the binary.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build_date: String,
    /// Where to look for documentation and further information.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub home: String,
    /// `name@version+commit`; parts that are not available are omitted.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub release: String,
    pub os: String,
    pub arch: String,
}

/// Version information for the running binary.
pub fn build_details() -> VersionInfo {
    let mut info = VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_code: option_env!("ECHO_BUILD_CODE").unwrap_or_default().to_string(),
        build_date: option_env!("ECHO_BUILD_DATE").unwrap_or_default().to_string(),
        home: env!("CARGO_PKG_REPOSITORY").to_string(),
        release: String::new(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };
    info.release = release_code(&info);
    info
}

impl VersionInfo {
    /// Human-readable rendering used by the `version` command.
    pub fn values(&self) -> BTreeMap<&'static str, String> {
        let mut values = BTreeMap::from([
            ("Name", self.name.clone()),
            ("Home", self.home.clone()),
            ("Version", self.version.clone()),
            ("Build Code", self.build_code.clone()),
            ("OS/Arch", format!("{}/{}", self.os, self.arch)),
            ("Release", self.release.clone()),
        ]);
        if !self.build_date.is_empty() {
            values.insert("Release Date", self.build_date.clone());
        }
        values
    }
}

fn release_code(info: &VersionInfo) -> String {
    if info.name.is_empty() {
        return String::new();
    }
    let mut release = info.name.clone();
    if info.version.matches('.').count() >= 2 {
        release = format!("{release}@{}", info.version);
    }
    if !info.build_code.is_empty() {
        release = format!("{release}+{}", info.build_code);
    }
    release
}
