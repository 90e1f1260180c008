use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ui::MainBarLayout;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "ScriptConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "ScriptConfig::default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "ScriptConfig::default_levels_dir")]
    pub levels_dir: PathBuf,
    #[serde(default = "ScriptConfig::default_entities_dir")]
    pub entities_dir: PathBuf,
    /// Operation budget for top-level code, which must only define functions
    /// and cheap globals.
    #[serde(default = "ScriptConfig::default_init_operation_budget")]
    pub init_operation_budget: u64,
    #[serde(default = "ScriptConfig::default_operation_budget")]
    pub operation_budget: u64,
    #[serde(default = "ScriptConfig::default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default)]
    pub main_bar: MainBarLayout,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub rng_seed: Option<u64>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            scripts_dir: Self::default_scripts_dir(),
            levels_dir: Self::default_levels_dir(),
            entities_dir: Self::default_entities_dir(),
            init_operation_budget: Self::default_init_operation_budget(),
            operation_budget: Self::default_operation_budget(),
            phase_timeout_ms: Self::default_phase_timeout_ms(),
            rng_seed: None,
            main_bar: MainBarLayout::default(),
        }
    }
}

impl ScriptConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    fn default_scripts_dir() -> PathBuf {
        PathBuf::from("scripts")
    }

    fn default_levels_dir() -> PathBuf {
        PathBuf::from("houses")
    }

    fn default_entities_dir() -> PathBuf {
        PathBuf::from("entities")
    }

    const fn default_init_operation_budget() -> u64 {
        25_000
    }

    const fn default_operation_budget() -> u64 {
        250_000
    }

    const fn default_phase_timeout_ms() -> u64 {
        5_000
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(target: "script", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ScriptConfigOverrides) {
        if let Some(data_dir) = &overrides.data_dir {
            self.data_dir = data_dir.clone();
        }
        if let Some(seed) = overrides.rng_seed {
            self.rng_seed = Some(seed);
        }
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    /// Relative script names resolve under the scripts directory.
    pub fn resolve_script(&self, script: impl AsRef<Path>) -> PathBuf {
        let script = script.as_ref();
        if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.data_dir.join(&self.scripts_dir).join(script)
        }
    }

    pub fn levels_path(&self) -> PathBuf {
        self.data_dir.join(&self.levels_dir)
    }

    pub fn entities_path(&self) -> PathBuf {
        self.data_dir.join(&self.entities_dir)
    }
}

impl ScriptConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.data_dir.is_none() && self.rng_seed.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.data_dir.is_some() {
            fields.push("data_dir");
        }
        if self.rng_seed.is_some() {
            fields.push("rng_seed");
        }
        fields
    }
}
