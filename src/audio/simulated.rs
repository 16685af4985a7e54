// Hardware-free devices
//
// `ToneCapture` records a sine tone for as long as it is "recording",
// `ClockPlayback` plays an artifact against the tokio clock, `NullRoute`
// accepts route overrides. All of them follow tokio's clock, so paused-time
// tests see exact durations.

use anyhow::{bail, Context, Result};
use hound::{WavSpec, WavWriter};
use std::f32::consts::TAU;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::clip_store::remove_artifact;
use super::device::{AudioPort, CaptureDevice, DeviceEvent, DeviceNotifier, OutputRoute, PlaybackDevice};
use super::file::AudioFile;

const WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Capture settings for [`ToneCapture`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub tone_hz: f32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            tone_hz: 440.0,
        }
    }
}

struct ActiveTake {
    path: PathBuf,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

/// Capture device that synthesizes a tone in place of a microphone
///
/// Samples are streamed to a WAV file every 100ms; the file always spans the
/// wall-clock length of the take.
pub struct ToneCapture {
    settings: ToneSettings,
    notifier: Option<DeviceNotifier>,
    active: Option<ActiveTake>,
    last_path: Option<PathBuf>,
}

impl ToneCapture {
    pub fn new(settings: ToneSettings) -> Self {
        info!(
            "Tone capture initialized ({}Hz, {} channels, {:.0}Hz tone)",
            settings.sample_rate, settings.channels, settings.tone_hz
        );

        Self {
            settings,
            notifier: None,
            active: None,
            last_path: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ToneCapture {
    fn attach(&mut self, notifier: DeviceNotifier) {
        self.notifier = Some(notifier);
    }

    async fn start_recording(&mut self, artifact: &Path) -> Result<()> {
        if self.active.is_some() {
            bail!("Already recording");
        }

        remove_artifact(artifact);
        let spec = WavSpec {
            channels: self.settings.channels,
            sample_rate: self.settings.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(artifact, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", artifact))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(stream_tone(
            writer,
            self.settings,
            stop_rx,
            self.notifier.clone(),
        ));

        debug!("Tone capture recording into {}", artifact.display());
        self.active = Some(ActiveTake {
            path: artifact.to_path_buf(),
            stop_tx,
            task,
        });
        self.last_path = Some(artifact.to_path_buf());

        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        let Some(take) = self.active.take() else {
            return Ok(());
        };

        let _ = take.stop_tx.send(());
        take.task
            .await
            .context("Capture task panicked")?
            .with_context(|| format!("Failed to finish take {:?}", take.path))?;

        debug!("Tone capture stopped: {}", take.path.display());
        Ok(())
    }

    async fn discard_current_recording(&mut self) -> Result<()> {
        if let Some(take) = self.active.take() {
            take.task.abort();
            let _ = take.task.await;
        }
        if let Some(path) = self.last_path.take() {
            remove_artifact(&path);
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    fn name(&self) -> &str {
        "tone"
    }
}

async fn stream_tone(
    mut writer: WavWriter<BufWriter<File>>,
    settings: ToneSettings,
    mut stop_rx: oneshot::Receiver<()>,
    notifier: Option<DeviceNotifier>,
) -> Result<()> {
    let started = Instant::now();
    let mut ticker = time::interval_at(started + WRITE_INTERVAL, WRITE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut written: u64 = 0;
    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = &mut stop_rx => true,
        };

        let due = frames_due(started.elapsed(), settings.sample_rate);
        if let Err(e) = write_tone(&mut writer, &settings, written, due) {
            error!("Tone capture encode failed: {:#}", e);
            if let Some(notifier) = &notifier {
                notifier.notify(DeviceEvent::EncodeFailed(format!("{:#}", e)));
            }
            return Err(e);
        }
        written = due;

        if stopping {
            break;
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

fn frames_due(elapsed: Duration, sample_rate: u32) -> u64 {
    (elapsed.as_nanos() * sample_rate as u128 / 1_000_000_000) as u64
}

fn write_tone(
    writer: &mut WavWriter<BufWriter<File>>,
    settings: &ToneSettings,
    from: u64,
    to: u64,
) -> Result<()> {
    let amplitude = i16::MAX as f32 * 0.3;
    for frame in from..to {
        let t = frame as f32 / settings.sample_rate as f32;
        let sample = (amplitude * (TAU * settings.tone_hz * t).sin()) as i16;
        for _ in 0..settings.channels {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
    }
    Ok(())
}

struct Loaded {
    path: PathBuf,
    duration: Duration,
    offset: Duration,
    playing_since: Option<Instant>,
    finish_task: Option<JoinHandle<()>>,
}

impl Loaded {
    fn position(&self) -> Duration {
        let played = self
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        (self.offset + played).min(self.duration)
    }

    fn halt(&mut self) {
        self.offset = self.position();
        self.playing_since = None;
        if let Some(task) = self.finish_task.take() {
            task.abort();
        }
    }
}

/// Playback device with no audio output
///
/// The artifact is decoded on load for its duration; the playhead then
/// advances with the tokio clock and natural completion is reported through
/// the attached notifier.
#[derive(Default)]
pub struct ClockPlayback {
    notifier: Option<DeviceNotifier>,
    loaded: Option<Loaded>,
}

impl ClockPlayback {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PlaybackDevice for ClockPlayback {
    fn attach(&mut self, notifier: DeviceNotifier) {
        self.notifier = Some(notifier);
    }

    async fn load(&mut self, artifact: &Path) -> Result<()> {
        self.stop().await?;

        let path = artifact.to_path_buf();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("Decode task panicked")?
            .with_context(|| format!("Failed to load {:?} for playback", artifact))?;

        debug!(
            "Playback loaded {} ({:.2}s)",
            artifact.display(),
            audio.duration_seconds
        );
        self.loaded = Some(Loaded {
            path: artifact.to_path_buf(),
            duration: Duration::from_secs_f64(audio.duration_seconds),
            offset: Duration::ZERO,
            playing_since: None,
            finish_task: None,
        });
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let Some(loaded) = self.loaded.as_mut() else {
            bail!("Nothing loaded for playback");
        };
        if loaded.playing_since.is_some() {
            return Ok(());
        }

        let remaining = loaded.duration.saturating_sub(loaded.offset);
        loaded.playing_since = Some(Instant::now());

        let notifier = self.notifier.clone();
        let path = loaded.path.clone();
        loaded.finish_task = Some(tokio::spawn(async move {
            time::sleep(remaining).await;
            debug!("Playback reached end of {}", path.display());
            if let Some(notifier) = notifier {
                notifier.notify(DeviceEvent::PlaybackFinished);
            }
        }));

        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.halt();
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut loaded) = self.loaded.take() {
            loaded.halt();
        }
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.loaded.as_ref().map(Loaded::position)
    }

    fn is_playing(&self) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|l| l.playing_since.is_some() && l.position() < l.duration)
    }

    fn name(&self) -> &str {
        "clock"
    }
}

/// Output route that has no hardware behind it
#[derive(Debug, Clone, Copy)]
pub struct NullRoute {
    speaker_available: bool,
}

impl NullRoute {
    pub fn new(speaker_available: bool) -> Self {
        Self { speaker_available }
    }
}

impl Default for NullRoute {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OutputRoute for NullRoute {
    fn override_output(&mut self, port: AudioPort) -> Result<()> {
        if port == AudioPort::Speaker && !self.speaker_available {
            warn!("No loudspeaker on this route");
            bail!("Speaker route unavailable");
        }
        debug!("Output routed to {}", port);
        Ok(())
    }
}
