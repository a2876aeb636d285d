//! Configuration file discovery and loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File name looked up in every discovery location.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse configuration file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configuration subtree does not match the expected schema.
    #[error("invalid settings under '{key}'")]
    Deserialize {
        key: String,
        #[source]
        source: toml::de::Error,
    },

    /// The file watcher could not be installed.
    #[error("failed to watch configuration file {path:?}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Candidate locations for the configuration file of `app_name`, in lookup
/// order: `/etc/<app>`, `$HOME/<app>`, `$HOME/.<app>` and the working directory.
pub fn search_paths(app_name: &str) -> Vec<PathBuf> {
    let mut paths = vec![Path::new("/etc").join(app_name)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(app_name));
        paths.push(home.join(format!(".{app_name}")));
    }
    paths.push(PathBuf::from("."));
    paths
}

/// Locate the configuration file to use.
///
/// An explicitly provided path always wins, even if it does not exist (the
/// read error is reported later). Otherwise the first existing
/// `config.toml` among [`search_paths`] is returned.
pub fn discover(app_name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    search_paths(app_name)
        .into_iter()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Read and parse a TOML configuration file.
pub fn load_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
