use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::ToneSettings;
use crate::session::RecorderConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub capture: CaptureConfig,
}

/// Settings for the simulated capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub tone_hz: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let tone = ToneSettings::default();
        Self {
            sample_rate: tone.sample_rate,
            channels: tone.channels,
            tone_hz: tone.tone_hz,
        }
    }
}

impl From<&CaptureConfig> for ToneSettings {
    fn from(capture: &CaptureConfig) -> Self {
        ToneSettings {
            sample_rate: capture.sample_rate,
            channels: capture.channels,
            tone_hz: capture.tone_hz,
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate understands), then apply
    /// `TAKE_RECORDER__SECTION__KEY` environment overrides
    ///
    /// A missing file is not an error; defaults fill every gap.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TAKE_RECORDER").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
