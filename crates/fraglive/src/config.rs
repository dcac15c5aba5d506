use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Session defaults persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period before an edited channel recompiles, in milliseconds.
    pub quiet_ms: u64,
    /// Whether the sound channel starts enabled.
    pub sound_enabled: bool,
    pub export: ExportDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    pub format: String,
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub quality: f32,
    pub start_time: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quiet_ms: 1000,
            sound_enabled: false,
            export: ExportDefaults::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            format: "gif".to_string(),
            frames: 180,
            width: 512,
            height: 256,
            framerate: 60,
            quality: 100.0,
            start_time: 0.0,
        }
    }
}

impl SessionConfig {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            let config: Self = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("failed to prepare directory for config at {}", dir.display())
                })?;
            }
        }
        let serialized =
            toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }
}
