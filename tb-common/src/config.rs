// tb-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

use super::error::{Result, TbError};

// Used when neither TB_PREFIX nor HOMEBREW_PREFIX is set.
const DEFAULT_FALLBACK_PREFIX: &str = "/usr/local";

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub cache: PathBuf,
    pub formula_dir: PathBuf,
    pub build_from_source: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading tb configuration");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup. `load` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let prefix_str = non_empty("TB_PREFIX")
            .or_else(|| non_empty("HOMEBREW_PREFIX"))
            .unwrap_or_else(|| {
                debug!(
                    "TB_PREFIX and HOMEBREW_PREFIX not set, falling back to default: {}",
                    DEFAULT_FALLBACK_PREFIX
                );
                DEFAULT_FALLBACK_PREFIX.to_string()
            });
        let prefix = PathBuf::from(&prefix_str);
        if !prefix.is_absolute() {
            return Err(TbError::Config(format!(
                "prefix must be an absolute path, got '{prefix_str}'"
            )));
        }
        debug!("Effective prefix set to: {}", prefix.display());

        let cache = match non_empty("TB_CACHE") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "tb")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .unwrap_or_else(|| prefix.join("var/cache/tb")),
        };

        let formula_dir = non_empty("TB_FORMULA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| prefix.join("Library/Formula"));

        let build_from_source = non_empty("TB_BUILD_FROM_SOURCE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        debug!("Configuration loaded successfully.");
        Ok(Self {
            prefix,
            cache,
            formula_dir,
            build_from_source,
        })
    }

    /// Self-contained layout rooted at `prefix`, cache and formulae included.
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            cache: prefix.join("var/cache/tb"),
            formula_dir: prefix.join("Library/Formula"),
            build_from_source: false,
            prefix,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.clone()
    }

    pub fn formula_dir(&self) -> &Path {
        &self.formula_dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("var/tb")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    pub fn linked_dir(&self) -> PathBuf {
        self.state_dir().join("linked")
    }

    pub fn pinned_dir(&self) -> PathBuf {
        self.state_dir().join("pinned")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.prefix.join("var/log/tb")
    }

    pub fn formula_cellar_dir(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn formula_keg_path(&self, formula_name: &str, version_str: &str) -> PathBuf {
        self.formula_cellar_dir(formula_name).join(version_str)
    }

    pub fn formula_opt_path(&self, formula_name: &str) -> PathBuf {
        self.opt_dir().join(formula_name)
    }

    pub fn linked_record_path(&self, formula_name: &str) -> PathBuf {
        self.linked_dir().join(formula_name)
    }

    pub fn pinned_record_path(&self, formula_name: &str) -> PathBuf {
        self.pinned_dir().join(formula_name)
    }
}
