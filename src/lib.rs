pub mod audio;
pub mod config;
pub mod session;

pub use audio::{
    AudioFile, AudioPort, CaptureDevice, ClipStore, DeviceEvent, DeviceNotifier, Exporter,
    MergeError, MergeRequest, OutputFormat, OutputRoute, PlaybackDevice, TrackMerger, WavExporter,
};
pub use config::Config;
pub use session::{
    Devices, ElapsedKind, RecorderConfig, RecordingSession, SessionError, SessionHandle,
    SessionState, SessionStats, SessionUpdate,
};
