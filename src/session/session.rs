use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::RecorderConfig;
use super::elapsed::ElapsedCounter;
use super::state::{transition, Effect, Event, InvalidTransition, SessionState};
use super::stats::{ElapsedKind, SessionStats, SessionUpdate};
use crate::audio::{
    remove_artifact, AudioPort, CaptureDevice, ClipStore, DeviceEvent, DeviceNotifier, Exporter,
    MergeError, MergeRequest, OutputRoute, PlaybackDevice, TrackMerger,
};

/// Errors reported back to the host for a session request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{event} is not allowed while {from}")]
    InvalidTransition { from: SessionState, event: Event },

    #[error("recording session has shut down")]
    Closed,
}

impl From<InvalidTransition> for SessionError {
    fn from(e: InvalidTransition) -> Self {
        SessionError::InvalidTransition {
            from: e.from,
            event: e.event,
        }
    }
}

/// The collaborators a session drives
pub struct Devices {
    pub capture: Box<dyn CaptureDevice>,
    pub playback: Box<dyn PlaybackDevice>,
    pub route: Box<dyn OutputRoute>,
    pub exporter: Arc<dyn Exporter>,
}

enum Command {
    Apply {
        event: Event,
        reply: oneshot::Sender<Result<SessionState, SessionError>>,
    },
    SetPort {
        port: AudioPort,
        reply: oneshot::Sender<AudioPort>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// Messages the session posts to itself
pub(super) enum Internal {
    Tick {
        kind: ElapsedKind,
        generation: u64,
    },
    MergeFinished {
        ticket: Uuid,
        result: Result<PathBuf, MergeError>,
    },
}

struct PendingMerge {
    ticket: Uuid,
    source: PathBuf,
}

type Deferred = (Event, oneshot::Sender<Result<SessionState, SessionError>>);

/// Cloneable host-side handle to a running session
///
/// Every request is serialized onto the session's control task. Requests that
/// arrive while a merge is running (other than cancel and port changes) wait
/// for it to settle before they are applied.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Start, pause or resume recording
    pub async fn record(&self) -> Result<SessionState, SessionError> {
        self.apply(Event::Record).await
    }

    /// Start, pause or resume playback of the recording so far
    pub async fn toggle_playback(&self) -> Result<SessionState, SessionError> {
        self.apply(Event::TogglePlayback).await
    }

    /// Abandon the session and delete everything it recorded
    pub async fn cancel(&self) -> Result<SessionState, SessionError> {
        self.apply(Event::Cancel).await
    }

    /// Finish the session and hand the merged recording to the host
    ///
    /// `DidSave` always carries the output path. When no take was ever
    /// committed (saving from `Empty`, or after a failed first capture) that
    /// file does not exist; check `SessionStats::takes` before using it.
    pub async fn save(&self) -> Result<SessionState, SessionError> {
        self.apply(Event::Save).await
    }

    /// Request an output route; resolves to the route actually in effect
    pub async fn set_port(&self, port: AudioPort) -> Result<AudioPort, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::SetPort { port, reply })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Stats { reply })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn apply(&self, event: Event) -> Result<SessionState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Apply { event, reply })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

/// A recording session: takes, preview playback, and the merged recording
///
/// The session runs as a single control task. Host requests, device
/// notifications, merge completions and elapsed ticks are all applied there,
/// one at a time, so session fields are never touched concurrently.
pub struct RecordingSession {
    id: Uuid,
    config: RecorderConfig,
    started_at: chrono::DateTime<Utc>,

    state: SessionState,
    previous_state: SessionState,
    port: AudioPort,
    takes: usize,

    store: ClipStore,
    /// The accumulating merged recording
    output: PathBuf,
    /// The file the capture device is writing (the output itself for the first take)
    active_capture: PathBuf,

    capture: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackDevice>,
    route: Box<dyn OutputRoute>,
    merger: TrackMerger,

    recording_elapsed: ElapsedCounter,
    playback_elapsed: ElapsedCounter,

    pending_merge: Option<PendingMerge>,
    deferred: VecDeque<Deferred>,
    /// Save arrived while a merge was running; report it once the merge settles
    save_pending: bool,

    internal_tx: mpsc::UnboundedSender<Internal>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl RecordingSession {
    /// Create the session's artifacts, apply the default route and spawn the
    /// control task
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: RecorderConfig,
        mut devices: Devices,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>)> {
        let id = Uuid::new_v4();
        info!(
            "Creating recording session {} ({}, capture: {}, playback: {}, exporter: {})",
            id,
            config.output_format,
            devices.capture.name(),
            devices.playback.name(),
            devices.exporter.name()
        );

        let mut store = ClipStore::new(&config.storage_dir, config.output_format)
            .context("Failed to prepare artifact storage")?;
        let output = store.allocate();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        devices.capture.attach(DeviceNotifier::new(device_tx.clone()));
        devices.playback.attach(DeviceNotifier::new(device_tx));

        let interval = config.tick_interval();
        let mut session = Self {
            id,
            started_at: Utc::now(),
            state: SessionState::Empty,
            previous_state: SessionState::Empty,
            port: config.default_port,
            takes: 0,
            store,
            active_capture: output.clone(),
            output,
            capture: devices.capture,
            playback: devices.playback,
            route: devices.route,
            merger: TrackMerger::new(devices.exporter),
            recording_elapsed: ElapsedCounter::new(ElapsedKind::Recording, interval),
            playback_elapsed: ElapsedCounter::new(ElapsedKind::Playback, interval),
            pending_merge: None,
            deferred: VecDeque::new(),
            save_pending: false,
            internal_tx,
            updates: update_tx,
            config,
        };

        session.emit(SessionUpdate::StateChanged {
            state: SessionState::Empty,
        });
        session.route_audio(session.config.default_port);

        tokio::spawn(session.run(command_rx, device_rx, internal_rx));

        Ok((SessionHandle { tx: command_tx }, update_rx))
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut device_events: mpsc::UnboundedReceiver<DeviceEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("Recording session {} started", self.id);
        let mut host_connected = true;

        loop {
            tokio::select! {
                command = commands.recv(), if host_connected => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All handles to session {} dropped", self.id);
                        host_connected = false;
                    }
                },
                Some(event) = device_events.recv() => self.handle_device_event(event).await,
                Some(message) = internal.recv() => self.handle_internal(message).await,
                else => break,
            }

            if !host_connected && self.pending_merge.is_none() {
                break;
            }
        }

        self.teardown().await;
        info!("Recording session {} stopped ({})", self.id, self.state);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply { event, reply } => {
                let waits_for_merge = !matches!(event, Event::Cancel);
                if waits_for_merge && self.pending_merge.is_some() {
                    debug!("Deferring {} until the running merge settles", event);
                    self.deferred.push_back((event, reply));
                    return;
                }
                let result = self.apply(event).await;
                let _ = reply.send(result);
            }
            Command::SetPort { port, reply } => {
                if self.config.allow_port_selection {
                    self.route_audio(port);
                } else {
                    warn!("Port selection is disabled; staying on {}", self.port);
                }
                let _ = reply.send(self.port);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn handle_device_event(&mut self, event: DeviceEvent) {
        let event = match event {
            DeviceEvent::EncodeFailed(message) => {
                error!("Capture device {} failed: {}", self.capture.name(), message);
                Event::Fault(message)
            }
            DeviceEvent::DecodeFailed(message) => {
                error!("Playback device {} failed: {}", self.playback.name(), message);
                Event::Fault(message)
            }
            DeviceEvent::PlaybackFinished => Event::PlaybackEnded,
        };

        if let Err(e) = self.apply(event).await {
            error!("Device notification rejected: {}", e);
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Tick { kind, generation } => {
                let counter = match kind {
                    ElapsedKind::Recording => &mut self.recording_elapsed,
                    ElapsedKind::Playback => &mut self.playback_elapsed,
                };
                if let Some(value) = counter.on_tick(generation) {
                    self.emit(SessionUpdate::ElapsedChanged { kind, value });
                }
            }
            Internal::MergeFinished { ticket, result } => {
                self.merge_finished(ticket, result).await;
                self.drain_deferred().await;
            }
        }
    }

    /// Run one event through the transition table and perform its effects
    ///
    /// A failing effect turns into a `Fault` event, so a device error during
    /// (say) `StartCapture` leaves the session in `Error` rather than half-way
    /// into `Recording`.
    async fn apply(&mut self, event: Event) -> Result<SessionState, SessionError> {
        let mut next_event = Some(event);

        while let Some(event) = next_event.take() {
            let step = transition(&self.state, event.clone()).map_err(|e| {
                error!(
                    "Session {}: contract violation, {} is not allowed while {}",
                    self.id, e.event, e.from
                );
                SessionError::from(e)
            })?;

            if step.effects.is_empty() && step.next == self.state {
                debug!("Session {}: ignoring {} while {}", self.id, event, self.state);
                continue;
            }

            info!("Session {}: {} --{}--> {}", self.id, self.state, event, step.next);
            self.previous_state = std::mem::replace(&mut self.state, step.next);

            let mut failure = None;
            for effect in step.effects {
                if let Err(e) = self.perform(effect).await {
                    error!("Session {}: {:?} failed: {:#}", self.id, effect, e);
                    failure = Some(format!("{:#}", e));
                    break;
                }
            }

            self.emit(SessionUpdate::StateChanged {
                state: self.state.clone(),
            });

            next_event = failure.map(Event::Fault);
        }

        Ok(self.state.clone())
    }

    async fn perform(&mut self, effect: Effect) -> Result<()> {
        match effect {
            Effect::StartCapture => self.start_capture().await,
            Effect::ResumeCapture => self.resume_capture().await,
            Effect::PauseCapture => self.pause_capture().await,
            Effect::StartPlayback => self.start_playback().await,
            Effect::PausePlayback => self.pause_playback().await,
            Effect::FinishPlayback => self.finish_playback().await,
            Effect::StopAll => {
                self.stop_all().await;
                Ok(())
            }
            Effect::DiscardArtifacts => {
                self.discard_artifacts().await;
                Ok(())
            }
            Effect::DeliverArtifact => {
                self.deliver_artifact();
                Ok(())
            }
        }
    }

    async fn start_capture(&mut self) -> Result<()> {
        self.stop_playback_device().await;

        if self.recording_elapsed.reset() {
            self.emit_elapsed(ElapsedKind::Recording);
        }

        // First take goes straight into the output artifact
        self.active_capture = self.output.clone();
        remove_artifact(&self.active_capture);

        self.capture
            .start_recording(&self.active_capture)
            .await
            .with_context(|| format!("Failed to start recording into {:?}", self.active_capture))?;
        self.recording_elapsed.start(&self.internal_tx);
        Ok(())
    }

    async fn resume_capture(&mut self) -> Result<()> {
        // A stopped capture cannot be appended to; each later take gets its own file
        self.stop_playback_device().await;
        self.active_capture = self.store.allocate();

        self.capture
            .start_recording(&self.active_capture)
            .await
            .with_context(|| format!("Failed to start recording into {:?}", self.active_capture))?;
        self.recording_elapsed.start(&self.internal_tx);
        Ok(())
    }

    async fn pause_capture(&mut self) -> Result<()> {
        if let Some(value) = self.recording_elapsed.stop() {
            self.emit(SessionUpdate::ElapsedChanged {
                kind: ElapsedKind::Recording,
                value,
            });
        }

        if !self.capture.is_recording() {
            warn!(
                "Capture device {} had already stopped; take {} not recorded",
                self.capture.name(),
                self.takes + 1
            );
            return Ok(());
        }
        self.capture
            .stop_recording()
            .await
            .context("Failed to stop recording")?;

        let first_take = self.takes == 0;
        self.takes += 1;

        if first_take {
            info!("Take 1 recorded into {}", self.output.display());
            if !self.state.is_terminal() {
                let output = self.output.clone();
                self.load_preview(&output).await?;
            }
            return Ok(());
        }

        self.submit_merge();
        Ok(())
    }

    fn submit_merge(&mut self) {
        let ticket = Uuid::new_v4();
        let request = MergeRequest::new(
            self.active_capture.clone(),
            self.output.clone(),
            self.config.output_format,
        );

        info!(
            "Take {} recorded; merging {} into {}",
            self.takes,
            request.source.display(),
            request.destination.display()
        );

        let merger = self.merger.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = merger.merge(request).await;
            let _ = tx.send(Internal::MergeFinished { ticket, result });
        });

        self.pending_merge = Some(PendingMerge {
            ticket,
            source: self.active_capture.clone(),
        });
    }

    async fn merge_finished(&mut self, ticket: Uuid, result: Result<PathBuf, MergeError>) {
        let pending = match self.pending_merge.take() {
            Some(pending) if pending.ticket == ticket => pending,
            other => {
                warn!("Session {}: ignoring result of unknown merge {}", self.id, ticket);
                self.pending_merge = other;
                return;
            }
        };

        match (self.state.clone(), result) {
            (SessionState::Cancelled, result) => {
                debug!("Discarding merge result of cancelled session {}", self.id);
                if let Ok(merged) = result {
                    remove_artifact(&merged);
                }
                remove_artifact(&self.output);
                self.store.delete(&pending.source);
            }
            (SessionState::Saved, result) => {
                match result {
                    Ok(merged) => {
                        info!("Final take merged into {}", merged.display());
                        self.store.delete(&pending.source);
                    }
                    Err(e) => error!(
                        "Final take could not be merged, saving earlier takes only: {}",
                        e
                    ),
                }
                if self.save_pending {
                    self.save_pending = false;
                    self.deliver_artifact();
                }
            }
            (_, Ok(merged)) => {
                self.store.delete(&pending.source);
                if self.state == SessionState::Paused {
                    if let Err(e) = self.load_preview(&merged).await {
                        error!("Session {}: preview failed: {:#}", self.id, e);
                        let _ = self.apply(Event::Fault(format!("{:#}", e))).await;
                    }
                }
            }
            (_, Err(e)) => {
                error!("Session {}: merge failed: {}", self.id, e);
                let _ = self.apply(Event::Fault(e.to_string())).await;
            }
        }
    }

    async fn drain_deferred(&mut self) {
        while self.pending_merge.is_none() {
            let Some((event, reply)) = self.deferred.pop_front() else {
                break;
            };
            let result = self.apply(event).await;
            let _ = reply.send(result);
        }
    }

    async fn load_preview(&mut self, artifact: &Path) -> Result<()> {
        self.playback
            .load(artifact)
            .await
            .with_context(|| format!("Failed to load {:?} for preview", artifact))
    }

    async fn start_playback(&mut self) -> Result<()> {
        let resume = self
            .playback
            .position()
            .is_some_and(|position| position > Duration::ZERO);

        if resume {
            debug!("Resuming playback at {:?}", self.playback.position());
        } else {
            let output = self.output.clone();
            self.load_preview(&output).await?;
            if self.playback_elapsed.reset() {
                self.emit_elapsed(ElapsedKind::Playback);
            }
        }

        self.playback.play().await.context("Failed to start playback")?;
        self.playback_elapsed.start(&self.internal_tx);
        Ok(())
    }

    async fn pause_playback(&mut self) -> Result<()> {
        self.stop_playback_counter();
        if self.playback.is_playing() {
            self.playback.pause().await.context("Failed to pause playback")?;
        }
        Ok(())
    }

    async fn finish_playback(&mut self) -> Result<()> {
        self.stop_playback_counter();
        self.playback.stop().await.context("Failed to stop playback")
    }

    /// Best effort: every device is asked to stop even if one of them fails
    async fn stop_all(&mut self) {
        if let Some(value) = self.recording_elapsed.stop() {
            self.emit(SessionUpdate::ElapsedChanged {
                kind: ElapsedKind::Recording,
                value,
            });
        }
        self.stop_playback_counter();

        if self.capture.is_recording() {
            if let Err(e) = self.capture.stop_recording().await {
                warn!("Failed to stop capture: {:#}", e);
            }
        }
        self.stop_playback_device().await;
    }

    async fn discard_artifacts(&mut self) {
        if let Err(e) = self.capture.discard_current_recording().await {
            warn!("Failed to discard current recording: {:#}", e);
        }
        self.store.delete_all();
        self.deferred_rejections();
        info!("Session {} cancelled", self.id);
        self.emit(SessionUpdate::DidCancel);
    }

    fn deliver_artifact(&mut self) {
        if self.pending_merge.is_some() {
            debug!("Holding save until the running merge settles");
            self.save_pending = true;
            return;
        }

        if self.takes == 0 {
            warn!("Session {} saved with no committed takes: {}", self.id, self.output.display());
        }
        self.store.release(&self.output);
        info!("Session {} saved: {}", self.id, self.output.display());
        self.emit(SessionUpdate::DidSave {
            artifact: self.output.clone(),
        });
    }

    /// Requests queued behind a merge can no longer apply once the session ended
    fn deferred_rejections(&mut self) {
        for (event, reply) in self.deferred.drain(..) {
            let _ = reply.send(Err(SessionError::InvalidTransition {
                from: self.state.clone(),
                event,
            }));
        }
    }

    fn stop_playback_counter(&mut self) {
        if let Some(value) = self.playback_elapsed.stop() {
            self.emit(SessionUpdate::ElapsedChanged {
                kind: ElapsedKind::Playback,
                value,
            });
        }
    }

    async fn stop_playback_device(&mut self) {
        if let Err(e) = self.playback.stop().await {
            warn!("Failed to stop playback: {:#}", e);
        }
    }

    /// Apply an output route, falling back to the default route silently
    fn route_audio(&mut self, port: AudioPort) {
        let effective = match self.route.override_output(port) {
            Ok(()) => port,
            Err(e) if port != AudioPort::Default => {
                warn!("Could not route audio to {} ({:#}); using default", port, e);
                if let Err(e) = self.route.override_output(AudioPort::Default) {
                    warn!("Could not restore default route: {:#}", e);
                }
                AudioPort::Default
            }
            Err(e) => {
                warn!("Could not restore default route: {:#}", e);
                AudioPort::Default
            }
        };

        self.port = effective;
        self.emit(SessionUpdate::PortChanged { port: effective });
    }

    async fn teardown(&mut self) {
        self.recording_elapsed.stop();
        self.playback_elapsed.stop();
        if self.capture.is_recording() {
            if let Err(e) = self.capture.stop_recording().await {
                warn!("Failed to stop capture during teardown: {:#}", e);
            }
        }
        self.stop_playback_device().await;

        let leftovers = self.store.delete_all();
        if leftovers > 0 {
            debug!("Session {} removed {} unclaimed artifacts", self.id, leftovers);
        }
    }

    fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        SessionStats {
            session_id: self.id,
            state: self.state.clone(),
            previous_state: self.previous_state.clone(),
            takes: self.takes,
            recording_elapsed: self.recording_elapsed.value(),
            playback_elapsed: self.playback_elapsed.value(),
            port: self.port,
            output: self.output.clone(),
            merge_pending: self.pending_merge.is_some(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        }
    }

    fn emit_elapsed(&self, kind: ElapsedKind) {
        let value = match kind {
            ElapsedKind::Recording => self.recording_elapsed.value(),
            ElapsedKind::Playback => self.playback_elapsed.value(),
        };
        self.emit(SessionUpdate::ElapsedChanged { kind, value });
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("Session {} has no update listener", self.id);
        }
    }
}
