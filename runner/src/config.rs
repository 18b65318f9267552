//! Engine configuration
//!
//! Loaded once at startup, in this order:
//! 1. `.env` (dotenvy)
//! 2. TOML file named by `CODE_RUNNER_CONFIG`, else `./files/config.toml`,
//!    else the embedded defaults
//! 3. `CODE_RUNNER_*` environment overrides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::AssemblyOptions;
use crate::core::Language;
use crate::sandbox::Limits;

const DEFAULT_CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/config.toml"));
const DEFAULT_CONFIG_PATH: &str = "./files/config.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Memory ceiling of the sandboxed program in MB (default: 128MB)
    pub memory_limit_mb: u64,
    /// Wall-clock limit of the run in seconds (default: 30s)
    pub timeout_secs: u64,
    /// Wall-clock limit of the image build in seconds (default: 300s)
    pub build_timeout_secs: u64,
    /// Allow network access from the sandbox (default: false)
    pub network_enabled: bool,
    /// Maximum number of processes inside the sandbox (default: 64)
    pub pids_limit: i64,
    /// Build submission images on top of a cached per-language base image (default: true)
    pub base_image_cache: bool,
    /// Bytes kept per output stream, the rest is dropped (default: 1MB)
    pub output_limit_bytes: usize,
    /// Directory local dependency tokens are resolved against (default: cwd)
    pub dependency_root: Option<PathBuf>,
    /// Parent directory of build contexts (default: system temp dir)
    pub work_root: Option<PathBuf>,
    /// Asset directories per language id
    pub assets: BTreeMap<String, Vec<PathBuf>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
            timeout_secs: 30,
            build_timeout_secs: 300,
            network_enabled: false,
            pids_limit: 64,
            base_image_cache: true,
            output_limit_bytes: 1024 * 1024,
            dependency_root: None,
            work_root: None,
            assets: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment and config file
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("CODE_RUNNER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::from_toml(DEFAULT_CONFIG).context("Invalid embedded configuration")?,
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        info!(
            "Loaded engine configuration (memory: {}MB, timeout: {}s, build timeout: {}s, network: {})",
            config.memory_limit_mb, config.timeout_secs, config.build_timeout_secs, config.network_enabled
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `CODE_RUNNER_*` overrides from the given variable lookup
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("CODE_RUNNER_MEMORY_MB") {
            self.memory_limit_mb = v.trim().parse().context("Invalid CODE_RUNNER_MEMORY_MB")?;
        }
        if let Some(v) = var("CODE_RUNNER_TIMEOUT_SECS") {
            self.timeout_secs = v.trim().parse().context("Invalid CODE_RUNNER_TIMEOUT_SECS")?;
        }
        if let Some(v) = var("CODE_RUNNER_BUILD_TIMEOUT_SECS") {
            self.build_timeout_secs = v
                .trim()
                .parse()
                .context("Invalid CODE_RUNNER_BUILD_TIMEOUT_SECS")?;
        }
        if let Some(v) = var("CODE_RUNNER_OUTPUT_LIMIT_BYTES") {
            self.output_limit_bytes = v
                .trim()
                .parse()
                .context("Invalid CODE_RUNNER_OUTPUT_LIMIT_BYTES")?;
        }
        if let Some(v) = var("CODE_RUNNER_NETWORK") {
            self.network_enabled = match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => bail!("Invalid CODE_RUNNER_NETWORK: {}", other),
            };
        }
        Ok(())
    }

    /// Reject limits that would make every submission fail
    pub fn validate(&self) -> Result<()> {
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than zero");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.build_timeout_secs == 0 {
            bail!("build_timeout_secs must be greater than zero");
        }
        if self.pids_limit <= 0 {
            bail!("pids_limit must be greater than zero");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be greater than zero");
        }
        for id in self.assets.keys() {
            Language::lookup(id).with_context(|| format!("Unknown language in [assets]: {}", id))?;
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            memory_bytes: self.memory_limit_mb * 1024 * 1024,
            wall_clock: Duration::from_secs(self.timeout_secs),
            build_timeout: Duration::from_secs(self.build_timeout_secs),
            network_enabled: self.network_enabled,
            pids_limit: self.pids_limit,
            output_limit: self.output_limit_bytes,
        }
    }

    /// Assets configured for a language (aliases in the table are accepted)
    pub fn assets_for(&self, language: Language) -> Vec<PathBuf> {
        self.assets
            .iter()
            .filter(|(id, _)| Language::lookup(id).ok() == Some(language))
            .flat_map(|(_, paths)| paths.iter().cloned())
            .collect()
    }

    pub fn assembly_options(&self, language: Language, layered: bool) -> AssemblyOptions {
        AssemblyOptions {
            work_root: self.work_root.clone(),
            layered,
            assets: self.assets_for(language),
        }
    }
}

/// Global engine configuration
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global configuration
pub fn init_config(config: EngineConfig) -> Result<()> {
    ENGINE_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Engine configuration already initialized"))?;

    Ok(())
}

/// Get the global configuration
pub fn get_config() -> &'static EngineConfig {
    ENGINE_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<EngineConfig> = OnceLock::new();

        warn!("Engine configuration not initialized, using default");
        DEFAULT.get_or_init(EngineConfig::default)
    })
}
