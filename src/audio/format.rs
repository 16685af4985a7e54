use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Container/codec an exported recording is written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// RIFF/WAV, 16-bit PCM
    #[default]
    Wav,
    /// MPEG-4 container
    Mp4,
    /// MPEG-4 audio (AAC)
    M4a,
    Ac3,
    Amr,
    /// Compressed AIFF
    Aifc,
    Aiff,
    Mp3,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 8] = [
        OutputFormat::Wav,
        OutputFormat::Mp4,
        OutputFormat::M4a,
        OutputFormat::Ac3,
        OutputFormat::Amr,
        OutputFormat::Aifc,
        OutputFormat::Aiff,
        OutputFormat::Mp3,
    ];

    /// File extension (without the leading dot)
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::M4a => "m4a",
            OutputFormat::Ac3 => "ac3",
            OutputFormat::Amr => "amr",
            OutputFormat::Aifc => "aifc",
            OutputFormat::Aiff => "aiff",
            OutputFormat::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.extension() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", s))
    }
}
