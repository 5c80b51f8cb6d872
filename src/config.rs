use crate::core::{Result, WorkflowError};
use crate::policy::AccessPolicy;
use crate::storage::persistence::{DEFAULT_CHECKPOINT_THRESHOLD, DurabilityMode};
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "MODFLOW_DATA_DIR";
pub const ENV_DURABILITY: &str = "MODFLOW_DURABILITY";
pub const ENV_CHECKPOINT_EVERY: &str = "MODFLOW_CHECKPOINT_EVERY";
pub const ENV_POLICY: &str = "MODFLOW_POLICY";

/// Engine configuration
///
/// With no `data_dir` the engine runs purely in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding the WAL and snapshot files
    pub data_dir: Option<PathBuf>,

    /// How hard each WAL frame is pushed to disk
    pub durability: DurabilityMode,

    /// WAL frames between automatic snapshots (0 disables them)
    pub checkpoint_every: usize,

    /// JSON permission table replacing the built-in one
    pub policy_path: Option<PathBuf>,
}

impl EngineConfig {
    /// In-memory configuration with the built-in policy
    pub fn new() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityMode::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_THRESHOLD,
            policy_path: None,
        }
    }

    /// Persistent configuration rooted at `dir`
    pub fn durable<P: AsRef<Path>>(dir: P) -> Self {
        Self::new().data_dir(dir).durability(DurabilityMode::Sync)
    }

    /// Set the data directory
    pub fn data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set the automatic checkpoint interval
    pub fn checkpoint_every(mut self, frames: usize) -> Self {
        self.checkpoint_every = frames;
        self
    }

    /// Set the policy file
    pub fn policy_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.policy_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read `MODFLOW_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = value(ENV_DATA_DIR) {
            config = config.data_dir(dir.trim());
        }
        if let Some(mode) = value(ENV_DURABILITY) {
            config = config.durability(mode.parse()?);
        }
        if let Some(every) = value(ENV_CHECKPOINT_EVERY) {
            let frames = every.trim().parse::<usize>().map_err(|_| {
                WorkflowError::Config(format!(
                    "{} must be a non-negative integer, got '{}'",
                    ENV_CHECKPOINT_EVERY, every
                ))
            })?;
            config = config.checkpoint_every(frames);
        }
        if let Some(policy) = value(ENV_POLICY) {
            config = config.policy_path(policy.trim());
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(WorkflowError::Config("data_dir cannot be empty".to_string()));
            }
            if dir.exists() && !dir.is_dir() {
                return Err(WorkflowError::Config(format!(
                    "data_dir '{}' is not a directory",
                    dir.display()
                )));
            }
        }
        if let Some(path) = &self.policy_path {
            if !path.is_file() {
                return Err(WorkflowError::Config(format!(
                    "policy file '{}' does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn is_persistent(&self) -> bool {
        self.data_dir.is_some() && self.durability.is_persistent()
    }

    /// The configured policy file, or the built-in table.
    pub fn load_policy(&self) -> Result<AccessPolicy> {
        match &self.policy_path {
            Some(path) => AccessPolicy::load(path),
            None => Ok(AccessPolicy::default()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
