use crate::pool::default_workers;
use crate::CoreError;
use layerscope_format::Format;
use layerscope_schema::Scope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scan settings read from `~/.config/layerscope/config.toml`.
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    pub digests: bool,
    pub format: Format,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scope: Scope::Squashed,
            workers: None,
            cache_dir: None,
            digests: true,
            format: Format::LayerscopeJson,
        }
    }
}

impl ScanConfig {
    /// Load the default config file, or defaults when there is none.
    pub fn load_default() -> Result<Self, CoreError> {
        let path = default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(default_workers)
    }

    /// The configured cache directory, else `$XDG_CACHE_HOME/layerscope`,
    /// else `~/.cache/layerscope`.
    pub fn cache_root(&self) -> Result<PathBuf, CoreError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
            if !xdg.is_empty() {
                return Ok(PathBuf::from(xdg).join("layerscope"));
            }
        }
        Ok(home()?.join(".cache/layerscope"))
    }
}

fn home() -> Result<PathBuf, CoreError> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| CoreError::Config("HOME not set".to_owned()))
}

pub fn default_config_path() -> Result<PathBuf, CoreError> {
    Ok(home()?.join(".config/layerscope/config.toml"))
}
