// src/config.rs

//! keg configuration
//!
//! Precedence, lowest first: built-in defaults, the TOML config file,
//! `KEG_*` environment variables, command-line flags (applied by the CLI).
//!
//! ```toml
//! prefix = "/opt/keg"
//! catalog = "/opt/keg/Catalog"
//! jobs = 4
//! bottle_root_url = "https://bottles.example.com"
//! allow_bottles = true
//! ```

use crate::bottle::SelectorPolicy;
use crate::error::{Error, Result};
use crate::fetch::RetryPolicy;
use crate::layout::PrefixLayout;
use crate::recipe::KitchenConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default install prefix
pub const DEFAULT_PREFIX: &str = "/opt/keg";

/// Where bottles are downloaded from unless a manifest says otherwise
pub const DEFAULT_BOTTLE_ROOT: &str = "https://ghcr.io/v2/homebrew/core";

pub const ENV_PREFIX: &str = "KEG_PREFIX";
pub const ENV_CACHE: &str = "KEG_CACHE";
pub const ENV_CATALOG: &str = "KEG_CATALOG";

/// Configuration for the keg binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KegConfig {
    /// Install prefix (Cellar, opt, var live under it)
    pub prefix: PathBuf,

    /// Recipe directory; `<prefix>/Catalog` when unset
    pub catalog: Option<PathBuf>,

    /// Download cache; the user cache directory when unset
    pub cache: Option<PathBuf>,

    /// Receipt database; `<prefix>/var/keg/receipts.db` when unset
    pub database: Option<PathBuf>,

    /// Recipes built in parallel
    pub jobs: usize,

    pub allow_bottles: bool,

    pub bottle_root_url: String,

    /// Attempts per download, first one included
    pub fetch_attempts: u32,

    /// Kill a build or test command after this many seconds
    pub command_timeout_secs: Option<u64>,
}

impl Default for KegConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from(DEFAULT_PREFIX),
            catalog: None,
            cache: None,
            database: None,
            jobs: num_cpus(),
            allow_bottles: true,
            bottle_root_url: DEFAULT_BOTTLE_ROOT.to_string(),
            fetch_attempts: RetryPolicy::default().max_attempts,
            command_timeout_secs: None,
        }
    }
}

impl KegConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: KegConfig = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The config file, if given or present at the default location, with
    /// environment overrides applied
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!("Using config file {}", path.display());
                    Self::load(&path)?
                }
                None => Self::default(),
            },
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply `KEG_PREFIX`, `KEG_CACHE` and `KEG_CATALOG` from `lookup`
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(prefix) = get(ENV_PREFIX) {
            self.prefix = prefix;
        }
        if let Some(cache) = get(ENV_CACHE) {
            self.cache = Some(cache);
        }
        if let Some(catalog) = get(ENV_CATALOG) {
            self.catalog = Some(catalog);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.prefix.is_absolute() {
            return Err(Error::ConfigError(format!(
                "prefix must be an absolute path, got {}",
                self.prefix.display()
            )));
        }
        if self.jobs == 0 {
            return Err(Error::ConfigError("jobs must be at least 1".to_string()));
        }
        if self.fetch_attempts == 0 {
            return Err(Error::ConfigError("fetch_attempts must be at least 1".to_string()));
        }
        url::Url::parse(&self.bottle_root_url).map_err(|e| {
            Error::ConfigError(format!("Invalid bottle_root_url {}: {}", self.bottle_root_url, e))
        })?;
        Ok(())
    }

    pub fn layout(&self) -> PrefixLayout {
        PrefixLayout::new(&self.prefix)
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.prefix.join("Catalog"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("keg")
                .join("downloads")
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.layout().default_db_path())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn kitchen_config(&self) -> KitchenConfig {
        KitchenConfig {
            source_cache: self.cache_dir(),
            jobs: self.jobs,
            retry: self.retry_policy(),
        }
    }

    pub fn selector_policy(&self) -> SelectorPolicy {
        SelectorPolicy {
            allow_bottles: self.allow_bottles,
            force_source: false,
            local_cellar: self.layout().cellar().to_string_lossy().to_string(),
            root_url: self.bottle_root_url.clone(),
        }
    }
}

/// `<config dir>/keg/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keg").join("config.toml"))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_derive_from_prefix() {
        let config = KegConfig::default();
        assert_eq!(config.catalog_dir(), PathBuf::from("/opt/keg/Catalog"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/opt/keg/var/keg/receipts.db")
        );
        assert!(config.jobs > 0);
        assert!(config.validate().is_ok());
        assert_eq!(config.selector_policy().local_cellar, "/opt/keg/Cellar");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "prefix = \"/usr/local\"\njobs = 2\nallow_bottles = false\n").unwrap();

        let config = KegConfig::load(&path).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/usr/local"));
        assert_eq!(config.jobs, 2);
        assert!(!config.allow_bottles);
        assert_eq!(config.bottle_root_url, DEFAULT_BOTTLE_ROOT);
        assert_eq!(config.kitchen_config().jobs, 2);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "prefix = \"relative/path\"\n").unwrap();
        assert!(matches!(KegConfig::load(&path), Err(Error::ConfigError(_))));

        std::fs::write(&path, "jobs = \"many\"\n").unwrap();
        assert!(matches!(KegConfig::load(&path), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_PREFIX, "/home/me/.keg"),
            (ENV_CACHE, "/tmp/keg-cache"),
            (ENV_CATALOG, ""),
        ]);
        let config = KegConfig::default().with_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.prefix, PathBuf::from("/home/me/.keg"));
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/keg-cache"));
        // Empty values are ignored
        assert_eq!(config.catalog_dir(), PathBuf::from("/home/me/.keg/Catalog"));
    }
}
