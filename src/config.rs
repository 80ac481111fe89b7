//! Configuration for the resource library.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MODSHELF_HOME)
//! 2. Config file (.modshelf/config.yaml)
//! 3. Defaults (<data dir>/modshelf)
//!
//! Config file discovery:
//! - Searches current directory and parents for .modshelf/config.yaml
//! - Relative paths in the config file resolve against the project root
//!   (the parent of the .modshelf directory)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::ResourceDomain;
use crate::ingest::DEFAULT_SETTLE;
use crate::library::MaterializeStrategy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_MAX_CONCURRENT_IMPORTS: usize = 4;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub import: Option<ImportConfig>,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Library home (relative to the project root)
    pub home: Option<String>,
    /// Domain to directory mapping, e.g. `mods: ../instance/mods`
    #[serde(default)]
    pub domains: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    pub materialize: Option<MaterializeStrategy>,
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Glob patterns of file names the watchers never import
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Quiet period before an added file is imported
    pub settle_ms: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Library home
    pub home: PathBuf,
    /// Explicit per-domain directories; unmapped domains live under `home`
    pub domain_dirs: HashMap<ResourceDomain, PathBuf>,
    pub materialize: MaterializeStrategy,
    pub max_concurrent_imports: usize,
    pub ignore: Vec<String>,
    pub settle: Duration,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every other setting defaulted
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            domain_dirs: HashMap::new(),
            materialize: MaterializeStrategy::default(),
            max_concurrent_imports: DEFAULT_MAX_CONCURRENT_IMPORTS,
            ignore: Vec::new(),
            settle: DEFAULT_SETTLE,
            config_file: None,
        }
    }

    /// Directory owned by a domain
    pub fn domain_dir(&self, domain: ResourceDomain) -> PathBuf {
        self.domain_dirs
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| self.home.join(domain.dir_name()))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home.join("resource-images")
    }

    pub fn database_path(&self) -> PathBuf {
        self.home.join("resources.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home.join(".lock")
    }

    /// Compiled ignore patterns; invalid patterns are skipped with a warning
    pub fn ignore_patterns(&self) -> Vec<glob::Pattern> {
        self.ignore
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("Ignoring invalid watch pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".modshelf").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn default_home() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("Failed to determine data directory")?
        .join("modshelf"))
}

fn apply_config_file(
    mut resolved: ResolvedConfig,
    config: ConfigFile,
    config_path: &Path,
) -> Result<ResolvedConfig> {
    // Base directory is the parent of .modshelf/
    let base_dir = config_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."));

    if std::env::var("MODSHELF_HOME").is_err() {
        if let Some(ref home) = config.paths.home {
            resolved.home = resolve_path(base_dir, home);
        }
    }

    for (name, dir) in &config.paths.domains {
        let domain: ResourceDomain = name
            .parse()
            .with_context(|| format!("Invalid domain in {}", config_path.display()))?;
        resolved.domain_dirs.insert(domain, resolve_path(base_dir, dir));
    }

    if let Some(import) = config.import {
        if let Some(strategy) = import.materialize {
            resolved.materialize = strategy;
        }
        if let Some(max) = import.max_concurrent {
            resolved.max_concurrent_imports = max.max(1);
        }
    }

    if let Some(watch) = config.watch {
        resolved.ignore = watch.ignore;
        if let Some(ms) = watch.settle_ms {
            resolved.settle = Duration::from_millis(ms);
        }
    }

    resolved.config_file = Some(config_path.to_path_buf());
    Ok(resolved)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let home = match std::env::var("MODSHELF_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => default_home()?,
    };
    let resolved = ResolvedConfig::with_home(home);

    match find_config_file() {
        Some(config_path) => {
            let config = load_config_file(&config_path)?;
            apply_config_file(resolved, config, &config_path)
        }
        None => Ok(resolved),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
