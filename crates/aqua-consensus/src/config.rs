//! Engine configuration.
//!
//! [`AquahashConfig`] has sensible defaults for every field and can be
//! layered from an optional TOML/JSON file plus `AQUAHASH_*` environment
//! variables with [`AquahashConfig::load`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use aqua_core::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "AQUAHASH";

/// How the engine treats proof of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowMode {
    /// Full verification and mining.
    #[default]
    Normal,
    /// Delegate seal verification and sealing to another engine.
    Shared,
    /// Full verification with tiny caches and datasets.
    Test,
    /// Accept every seal, optionally failing one block number.
    Fake,
    /// Accept every header, uncle set, and seal.
    FullFake,
}

/// Configuration of an [`Aquahash`](crate::Aquahash) engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AquahashConfig {
    /// Where verification caches are spilled to disk.
    pub cache_dir: PathBuf,
    /// Verification caches kept in memory.
    pub caches_in_mem: usize,
    /// Verification caches kept on disk. Zero disables spilling.
    pub caches_on_disk: usize,
    /// Where mining datasets are spilled to disk.
    pub dataset_dir: PathBuf,
    /// Mining datasets kept in memory.
    pub datasets_in_mem: usize,
    /// Mining datasets kept on disk. Zero disables spilling.
    pub datasets_on_disk: usize,
    pub pow_mode: PowMode,
    /// Mining threads: 0 uses every core, negative disables local mining.
    pub threads: i32,
    /// Block number whose seal fails in fake modes.
    pub fake_fail: Option<u64>,
    /// Delay applied to every seal verification in fake modes.
    pub fake_delay_ms: u64,
}

impl Default for AquahashConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aquahash");

        Self {
            cache_dir: root.join("cache"),
            caches_in_mem: 2,
            caches_on_disk: 3,
            dataset_dir: root.join("dataset"),
            datasets_in_mem: 1,
            datasets_on_disk: 2,
            pow_mode: PowMode::Normal,
            threads: 0,
            fake_fail: None,
            fake_delay_ms: 0,
        }
    }
}

impl AquahashConfig {
    /// Layer defaults, an optional config file, and `AQUAHASH_*` variables.
    ///
    /// A missing file is not an error; the file format follows its extension.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        let cfg: AquahashConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no engine can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.caches_in_mem == 0 {
            return Err(ConfigError::Invalid {
                key: "caches_in_mem".to_string(),
                reason: "one cache must always be in memory".to_string(),
            });
        }
        if self.datasets_in_mem == 0 {
            return Err(ConfigError::Invalid {
                key: "datasets_in_mem".to_string(),
                reason: "one dataset must always be in memory".to_string(),
            });
        }
        Ok(())
    }

    /// Cache spill directory, if spilling is enabled.
    pub fn cache_spill_dir(&self) -> Option<PathBuf> {
        spill_dir(&self.cache_dir, self.caches_on_disk)
    }

    /// Dataset spill directory, if spilling is enabled.
    pub fn dataset_spill_dir(&self) -> Option<PathBuf> {
        spill_dir(&self.dataset_dir, self.datasets_on_disk)
    }

    pub fn fake_delay(&self) -> Duration {
        Duration::from_millis(self.fake_delay_ms)
    }

    /// In-memory configuration used by test engines: no disk, single cache.
    pub fn in_memory(pow_mode: PowMode) -> Self {
        Self {
            cache_dir: PathBuf::new(),
            caches_in_mem: 1,
            caches_on_disk: 0,
            dataset_dir: PathBuf::new(),
            datasets_in_mem: 1,
            datasets_on_disk: 0,
            pow_mode,
            ..Self::default()
        }
    }
}

fn spill_dir(dir: &Path, count: usize) -> Option<PathBuf> {
    if count == 0 || dir.as_os_str().is_empty() {
        None
    } else {
        Some(dir.to_path_buf())
    }
}
