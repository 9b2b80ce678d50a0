//! Server configuration, read from a TOML file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use transport::DEFAULT_DEBUGGER_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether `open_listener` may listen at all.
    pub remote_enabled: bool,
    /// Bind the listener to the loopback interface only.
    pub force_local: bool,
    pub port: u16,
    /// Tabs advertised by the browser root actor.
    pub tabs: Vec<TabDescriptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            force_local: true,
            port: DEFAULT_DEBUGGER_PORT,
            tabs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// `<config dir>/dbg-server/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dbg-server").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists.
    ///
    /// A missing default file gives the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading configuration from {}", path.display()))?;
        let config = contents
            .parse::<Self>()
            .wrap_err_with(|| format!("parsing configuration from {}", path.display()))?;
        tracing::debug!(?config, path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

impl FromStr for ServerConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// A tab the browser root actor lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabDescriptor {
    pub title: String,
    pub url: String,
}

impl TabDescriptor {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Parses `TITLE=URL`.
impl FromStr for TabDescriptor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (title, url) = s
            .split_once('=')
            .ok_or_else(|| format!("expected TITLE=URL, got '{s}'"))?;
        if url.is_empty() {
            return Err(format!("missing url in '{s}'"));
        }
        Ok(Self::new(title, url))
    }
}
