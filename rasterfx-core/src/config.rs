//! # Engine Configuration
//!
//! Settings for the secondary rendering context. Everything has a default,
//! so a config file only needs the keys it changes:
//!
//! ```json
//! { "power_preference": "LowPower", "sampling": { "mag_filter": "Nearest" } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FilterError, FilterResult};

/// Adapter selection hint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFilter {
    Linear,
    Nearest,
}

impl From<SampleFilter> for wgpu::FilterMode {
    fn from(filter: SampleFilter) -> Self {
        match filter {
            SampleFilter::Linear => wgpu::FilterMode::Linear,
            SampleFilter::Nearest => wgpu::FilterMode::Nearest,
        }
    }
}

/// Sampling policy for frame textures. Wrapping is always clamp-to-edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub min_filter: SampleFilter,
    pub mag_filter: SampleFilter,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            min_filter: SampleFilter::Linear,
            mag_filter: SampleFilter::Linear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub power_preference: PowerPreference,
    /// Ask for a software adapter (llvmpipe, WARP) instead of real hardware
    pub force_fallback_adapter: bool,
    pub device_label: String,
    pub sampling: SamplerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::default(),
            force_fallback_adapter: false,
            device_label: "rasterfx_filter_device".to_string(),
            sampling: SamplerSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> FilterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> FilterResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| FilterError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Save config to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> FilterResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
