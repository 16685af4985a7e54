pub mod clip_store;
pub mod device;
pub mod file;
pub mod format;
pub mod merge;
pub mod simulated;

pub use clip_store::{remove_artifact, ClipStore};
pub use device::{AudioPort, CaptureDevice, DeviceEvent, DeviceNotifier, OutputRoute, PlaybackDevice};
pub use file::{write_wav, AudioFile};
pub use format::OutputFormat;
pub use merge::{Composition, ExportOutcome, Exporter, MergeError, MergeRequest, TrackMerger, WavExporter};
pub use simulated::{ClockPlayback, NullRoute, ToneCapture, ToneSettings};
