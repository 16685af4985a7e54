use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioPort, OutputFormat};

/// Configuration for a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Container the merged recording is exported as
    pub output_format: OutputFormat,

    /// Whether the host may change the output route mid-session
    pub allow_port_selection: bool,

    /// Route applied when the session starts
    pub default_port: AudioPort,

    /// Caller-writable directory where takes and the merged recording live
    pub storage_dir: PathBuf,

    /// Elapsed-counter resolution in milliseconds
    /// Default: 10 (counters read in hundredths of a second)
    pub tick_interval_ms: u64,
}

impl RecorderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Wav,
            allow_port_selection: true,
            default_port: AudioPort::Default,
            storage_dir: std::env::temp_dir().join("take-recorder"),
            tick_interval_ms: 10,
        }
    }
}
