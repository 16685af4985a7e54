// Shared fakes for the session integration tests
//
// The capture fake writes one constant level per take (1000, 2000, ...) so a
// merged recording can be checked for order sample by sample.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

use take_recorder::audio::{
    remove_artifact, write_wav, AudioFile, AudioPort, CaptureDevice, Composition, DeviceEvent,
    DeviceNotifier, ExportOutcome, Exporter, NullRoute, OutputFormat, PlaybackDevice,
};
use take_recorder::{Devices, RecorderConfig, RecordingSession, SessionHandle, SessionUpdate};

/// Sample rate of every fake take: one frame per millisecond
pub const RATE: u32 = 1000;

/// Level written for take `n` (1-based)
pub fn level_of(take: usize) -> i16 {
    1000 * take as i16
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTake {
    pub path: PathBuf,
    pub level: i16,
    pub frames: usize,
}

/// Where a fake keeps the notifier the session attached to it
pub type NotifierSlot = Arc<Mutex<Option<DeviceNotifier>>>;

#[derive(Debug, Default)]
pub struct CaptureLog {
    pub takes: Vec<RecordedTake>,
    pub discarded: Vec<PathBuf>,
    /// Completed `stop_recording` calls on an active take
    pub stops: usize,
    /// The device stopped on its own; `is_recording` reports false from now on
    pub halted: bool,
    pub notifier: Option<DeviceNotifier>,
}

pub struct ScriptedCapture {
    log: Arc<Mutex<CaptureLog>>,
    current: Option<(PathBuf, Instant, i16)>,
    last: Option<PathBuf>,
    starts: usize,
    fail_start_on: Option<usize>,
}

impl ScriptedCapture {
    pub fn new(log: Arc<Mutex<CaptureLog>>) -> Self {
        Self {
            log,
            current: None,
            last: None,
            starts: 0,
            fail_start_on: None,
        }
    }

    /// Make the `n`th start (1-based) fail
    pub fn fail_start_on(mut self, n: usize) -> Self {
        self.fail_start_on = Some(n);
        self
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ScriptedCapture {
    fn attach(&mut self, notifier: DeviceNotifier) {
        self.log.lock().unwrap().notifier = Some(notifier);
    }

    async fn start_recording(&mut self, artifact: &Path) -> Result<()> {
        self.starts += 1;
        if self.fail_start_on == Some(self.starts) {
            bail!("microphone unavailable");
        }
        write_wav(artifact, RATE, 1, &[])?;
        self.current = Some((artifact.to_path_buf(), Instant::now(), level_of(self.starts)));
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        let Some((path, started, level)) = self.current.take() else {
            return Ok(());
        };
        let frames = started.elapsed().as_millis() as usize;
        write_wav(&path, RATE, 1, &vec![level; frames])?;
        {
            let mut log = self.log.lock().unwrap();
            log.stops += 1;
            log.takes.push(RecordedTake {
                path: path.clone(),
                level,
                frames,
            });
        }
        self.last = Some(path);
        Ok(())
    }

    async fn discard_current_recording(&mut self) -> Result<()> {
        let path = match self.current.take() {
            Some((path, _, _)) => Some(path),
            None => self.last.take(),
        };
        if let Some(path) = path {
            remove_artifact(&path);
            self.log.lock().unwrap().discarded.push(path);
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.current.is_some() && !self.log.lock().unwrap().halted
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCall {
    Load(PathBuf),
    Play { from: Duration },
    Pause { at: Duration },
    Stop,
}

/// Playback fake that logs every call and never reaches the end on its own
pub struct FakePlayback {
    log: Arc<Mutex<Vec<PlaybackCall>>>,
    notifier: NotifierSlot,
    loaded: Option<PathBuf>,
    offset: Duration,
    playing_since: Option<Instant>,
}

impl FakePlayback {
    pub fn new(log: Arc<Mutex<Vec<PlaybackCall>>>, notifier: NotifierSlot) -> Self {
        Self {
            log,
            notifier,
            loaded: None,
            offset: Duration::ZERO,
            playing_since: None,
        }
    }

    fn record(&self, call: PlaybackCall) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl PlaybackDevice for FakePlayback {
    fn attach(&mut self, notifier: DeviceNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }

    async fn load(&mut self, artifact: &Path) -> Result<()> {
        self.record(PlaybackCall::Load(artifact.to_path_buf()));
        AudioFile::open(artifact)?;
        self.loaded = Some(artifact.to_path_buf());
        self.offset = Duration::ZERO;
        self.playing_since = None;
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let from = self.position().ok_or_else(|| anyhow!("nothing loaded"))?;
        self.record(PlaybackCall::Play { from });
        self.playing_since = Some(Instant::now());
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        let at = self.position().unwrap_or_default();
        self.record(PlaybackCall::Pause { at });
        self.offset = at;
        self.playing_since = None;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.loaded.take().is_some() {
            self.record(PlaybackCall::Stop);
        }
        self.offset = Duration::ZERO;
        self.playing_since = None;
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.loaded.as_ref()?;
        let played = self
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        Some(self.offset + played)
    }

    fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Exporter that writes WAV data under any extension, with injectable outcomes
#[derive(Default)]
pub struct ScriptedExporter {
    calls: AtomicUsize,
    fail_on: Option<usize>,
    cancel_on: Option<usize>,
    delay: Duration,
}

impl ScriptedExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn cancel_on(mut self, n: usize) -> Self {
        self.cancel_on = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Exporter for ScriptedExporter {
    fn supports(&self, _format: OutputFormat) -> bool {
        true
    }

    async fn export(&self, composition: Composition, _format: OutputFormat, output: &Path) -> ExportOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on == Some(call) {
            return ExportOutcome::Failed(anyhow!("injected export failure"));
        }
        if self.cancel_on == Some(call) {
            return ExportOutcome::Cancelled;
        }

        let samples: Vec<i16> = composition.samples().collect();
        match write_wav(output, composition.sample_rate, composition.channels, &samples) {
            Ok(()) => ExportOutcome::Completed,
            Err(e) => ExportOutcome::Failed(e),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A session wired to the fakes, with its storage in a temp dir
pub struct Harness {
    pub dir: TempDir,
    pub handle: SessionHandle,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    pub captures: Arc<Mutex<CaptureLog>>,
    pub playback: Arc<Mutex<Vec<PlaybackCall>>>,
    pub playback_notifier: NotifierSlot,
    pub exporter: Arc<ScriptedExporter>,
}

pub struct HarnessBuilder {
    config: RecorderConfig,
    dir: TempDir,
    exporter: ScriptedExporter,
    fail_start_on: Option<usize>,
    speaker_available: bool,
}

impl HarnessBuilder {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let config = RecorderConfig {
            storage_dir: dir.path().join("takes"),
            ..RecorderConfig::default()
        };
        Ok(Self {
            config,
            dir,
            exporter: ScriptedExporter::new(),
            fail_start_on: None,
            speaker_available: true,
        })
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn port_selection(mut self, allowed: bool) -> Self {
        self.config.allow_port_selection = allowed;
        self
    }

    pub fn default_port(mut self, port: AudioPort) -> Self {
        self.config.default_port = port;
        self
    }

    pub fn exporter(mut self, exporter: ScriptedExporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn fail_start_on(mut self, n: usize) -> Self {
        self.fail_start_on = Some(n);
        self
    }

    pub fn without_speaker(mut self) -> Self {
        self.speaker_available = false;
        self
    }

    pub fn start(self) -> Result<Harness> {
        let captures = Arc::new(Mutex::new(CaptureLog::default()));
        let playback = Arc::new(Mutex::new(Vec::new()));
        let playback_notifier: NotifierSlot = Arc::new(Mutex::new(None));
        let exporter = Arc::new(self.exporter);

        let mut capture = ScriptedCapture::new(captures.clone());
        if let Some(n) = self.fail_start_on {
            capture = capture.fail_start_on(n);
        }

        let devices = Devices {
            capture: Box::new(capture),
            playback: Box::new(FakePlayback::new(playback.clone(), playback_notifier.clone())),
            route: Box::new(NullRoute::new(self.speaker_available)),
            exporter: exporter.clone(),
        };

        let (handle, updates) = RecordingSession::start(self.config, devices)?;

        Ok(Harness {
            dir: self.dir,
            handle,
            updates,
            captures,
            playback,
            playback_notifier,
            exporter,
        })
    }
}

impl Harness {
    pub fn storage(&self) -> PathBuf {
        self.dir.path().join("takes")
    }

    /// Files currently in the storage directory
    pub fn stored_files(&self) -> Result<Vec<PathBuf>> {
        files_in(&self.storage())
    }

    pub fn takes(&self) -> Vec<RecordedTake> {
        self.captures.lock().unwrap().takes.clone()
    }

    pub fn playback_calls(&self) -> Vec<PlaybackCall> {
        self.playback.lock().unwrap().clone()
    }

    pub fn capture_stops(&self) -> usize {
        self.captures.lock().unwrap().stops
    }

    /// Report an encode failure the way a capture device would
    pub fn encode_failure(&self, message: &str) -> bool {
        let log = self.captures.lock().unwrap();
        log.notifier
            .as_ref()
            .is_some_and(|n| n.notify(DeviceEvent::EncodeFailed(message.to_string())))
    }

    /// Report a decode failure the way a playback device would
    pub fn decode_failure(&self, message: &str) -> bool {
        let slot = self.playback_notifier.lock().unwrap();
        slot.as_ref()
            .is_some_and(|n| n.notify(DeviceEvent::DecodeFailed(message.to_string())))
    }

    /// Simulate a capture device that stopped by itself mid-take
    pub fn halt_capture(&self) {
        self.captures.lock().unwrap().halted = true;
    }

    /// Receive updates until one matches, returning everything seen on the way
    pub async fn wait_for(
        &mut self,
        matches: impl Fn(&SessionUpdate) -> bool,
    ) -> Result<Vec<SessionUpdate>> {
        let mut seen = Vec::new();
        loop {
            let update = tokio::time::timeout(Duration::from_secs(10), self.updates.recv())
                .await
                .map_err(|_| anyhow!("timed out waiting for update; saw {:?}", seen))?
                .ok_or_else(|| anyhow!("update stream closed; saw {:?}", seen))?;
            let done = matches(&update);
            seen.push(update);
            if done {
                return Ok(seen);
            }
        }
    }

    /// Drop the handle and collect every remaining update until the session exits
    pub async fn finish(self) -> Result<(TempDir, Vec<SessionUpdate>)> {
        let Harness {
            dir,
            handle,
            mut updates,
            ..
        } = self;
        drop(handle);

        let mut seen = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(10), updates.recv()).await {
                Ok(Some(update)) => seen.push(update),
                Ok(None) => return Ok((dir, seen)),
                Err(_) => bail!("session did not shut down; saw {:?}", seen),
            }
        }
    }
}

pub fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        files.push(entry?.path());
    }
    files.sort();
    Ok(files)
}
