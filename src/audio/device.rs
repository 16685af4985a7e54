use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Physical output route for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioPort {
    /// Platform default (receiver / headphones)
    #[default]
    Default,
    /// Built-in loudspeaker
    Speaker,
}

impl fmt::Display for AudioPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioPort::Default => f.write_str("default"),
            AudioPort::Speaker => f.write_str("speaker"),
        }
    }
}

/// Asynchronous notification raised by a device outside of a direct call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The capture device failed to encode incoming audio
    EncodeFailed(String),
    /// The playback device failed to decode the loaded artifact
    DecodeFailed(String),
    /// Playback reached the end of the loaded artifact
    PlaybackFinished,
}

/// Sending half handed to devices so they can report [`DeviceEvent`]s
///
/// Events land on the owning session's serialized queue.
#[derive(Debug, Clone)]
pub struct DeviceNotifier {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl DeviceNotifier {
    pub fn new(tx: mpsc::UnboundedSender<DeviceEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the session has gone away
    pub fn notify(&self, event: DeviceEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Audio input device that records into a file
///
/// A stopped recording cannot be appended to; every take gets a new target.
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Register where asynchronous encode failures are reported
    fn attach(&mut self, notifier: DeviceNotifier);

    /// Start recording into `artifact`, truncating anything already there
    async fn start_recording(&mut self, artifact: &Path) -> Result<()>;

    /// Stop recording and finalize the current file
    async fn stop_recording(&mut self) -> Result<()>;

    /// Stop (if needed) and delete the current recording's file
    async fn discard_current_recording(&mut self) -> Result<()>;

    fn is_recording(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Audio output device that plays a file
#[async_trait::async_trait]
pub trait PlaybackDevice: Send {
    /// Register where decode failures and end-of-playback are reported
    fn attach(&mut self, notifier: DeviceNotifier);

    /// Load `artifact`, replacing whatever was loaded, with the playhead at zero
    async fn load(&mut self, artifact: &Path) -> Result<()>;

    async fn play(&mut self) -> Result<()>;

    /// Pause, keeping the playhead where it is
    async fn pause(&mut self) -> Result<()>;

    /// Stop playback and unload
    async fn stop(&mut self) -> Result<()>;

    /// Current playhead, `None` when nothing is loaded
    fn position(&self) -> Option<Duration>;

    fn is_playing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Platform output-route override
pub trait OutputRoute: Send {
    fn override_output(&mut self, port: AudioPort) -> Result<()>;
}
