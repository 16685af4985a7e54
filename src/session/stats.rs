use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::state::SessionState;
use crate::audio::AudioPort;

/// Which activity an elapsed counter measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElapsedKind {
    Recording,
    Playback,
}

/// Notifications the session publishes to its host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionUpdate {
    StateChanged { state: SessionState },
    /// Counter value in ticks of the configured interval
    ElapsedChanged { kind: ElapsedKind, value: u64 },
    /// Effective output route (after any fallback)
    PortChanged { port: AudioPort },
    DidCancel,
    DidSave { artifact: PathBuf },
}

/// Snapshot of a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Uuid,

    pub state: SessionState,

    /// State before the most recent transition
    pub previous_state: SessionState,

    /// Takes committed so far
    pub takes: usize,

    /// Recording counter in ticks
    pub recording_elapsed: u64,

    /// Playback counter in ticks
    pub playback_elapsed: u64,

    pub port: AudioPort,

    /// The accumulating merged recording
    pub output: PathBuf,

    /// Whether a merge is still running
    pub merge_pending: bool,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Seconds since the session started
    pub duration_secs: f64,
}
