// Track merging: append one recorded take to the accumulated recording
//
// A merge decodes the destination (everything recorded so far) and the source
// (the take just captured), lays them end to end with no gap, and hands the
// composition to an `Exporter` that writes the target container.

use anyhow::{anyhow, Context};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clip_store::remove_artifact;
use super::file::{frames_to_seconds, write_wav, AudioFile};
use super::format::OutputFormat;

/// Why a merge did not produce an artifact
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("source and destination are the same artifact")]
    UrlsNotUnique,

    #[error("destination has no readable audio track: {0}")]
    DestinationTrackError(String),

    #[error("merging track has no readable audio track: {0}")]
    MergingTrackError(String),

    #[error("no export session available for format {0}")]
    ExportSessionError(OutputFormat),

    #[error("export failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("export was cancelled")]
    Cancelled,
}

impl MergeError {
    fn failed(cause: anyhow::Error) -> Self {
        MergeError::Failed(cause.into())
    }
}

/// One unit of merge work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// The take just captured
    pub source: PathBuf,
    /// Audio accumulated so far; the source is appended after it
    pub destination: PathBuf,
    /// Explicit target; `None` overwrites `destination`
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub delete_source_on_success: bool,
}

impl MergeRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            output: None,
            format,
            delete_source_on_success: true,
        }
    }

    pub fn write_to(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn keep_source(mut self) -> Self {
        self.delete_source_on_success = false;
        self
    }
}

/// Single-track, gapless sequence of PCM segments sharing one layout
#[derive(Debug, Clone)]
pub struct Composition {
    pub sample_rate: u32,
    pub channels: u16,
    segments: Vec<Vec<i16>>,
}

impl Composition {
    fn starting_with(first: AudioFile) -> Self {
        Self {
            sample_rate: first.sample_rate,
            channels: first.channels,
            segments: vec![first.samples],
        }
    }

    fn append(&mut self, next: AudioFile) -> anyhow::Result<()> {
        if next.sample_rate != self.sample_rate || next.channels != self.channels {
            return Err(anyhow!(
                "Track layout mismatch: {}Hz/{}ch cannot follow {}Hz/{}ch",
                next.sample_rate,
                next.channels,
                self.sample_rate,
                self.channels
            ));
        }
        self.segments.push(next.samples);
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Interleaved samples of every segment, in order
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.segments.iter().flatten().copied()
    }

    pub fn sample_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    pub fn duration_seconds(&self) -> f64 {
        frames_to_seconds(self.sample_count(), self.sample_rate, self.channels)
    }
}

/// Terminal status of an export
#[derive(Debug)]
pub enum ExportOutcome {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
}

/// Encodes a composition into a container on disk
#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    /// Whether an export session can be created for `format`
    fn supports(&self, format: OutputFormat) -> bool;

    async fn export(&self, composition: Composition, format: OutputFormat, output: &Path) -> ExportOutcome;

    /// Exporter name for logging
    fn name(&self) -> &str;
}

/// Exporter writing 16-bit PCM WAV through hound
#[derive(Debug, Default, Clone, Copy)]
pub struct WavExporter;

#[async_trait::async_trait]
impl Exporter for WavExporter {
    fn supports(&self, format: OutputFormat) -> bool {
        format == OutputFormat::Wav
    }

    async fn export(&self, composition: Composition, _format: OutputFormat, output: &Path) -> ExportOutcome {
        let output = output.to_path_buf();
        let written = tokio::task::spawn_blocking(move || {
            let samples: Vec<i16> = composition.samples().collect();
            write_wav(&output, composition.sample_rate, composition.channels, &samples)
        })
        .await;

        match written {
            Ok(Ok(())) => ExportOutcome::Completed,
            Ok(Err(e)) => ExportOutcome::Failed(e),
            Err(e) => ExportOutcome::Failed(anyhow!("Export task panicked: {}", e)),
        }
    }

    fn name(&self) -> &str {
        "wav"
    }
}

/// Concatenates takes through an [`Exporter`]
#[derive(Clone)]
pub struct TrackMerger {
    exporter: Arc<dyn Exporter>,
}

impl TrackMerger {
    pub fn new(exporter: Arc<dyn Exporter>) -> Self {
        Self { exporter }
    }

    /// Append `request.source` to `request.destination`
    ///
    /// Resolves to the path of the merged artifact.
    pub async fn merge(&self, request: MergeRequest) -> Result<PathBuf, MergeError> {
        if request.source == request.destination {
            return Err(MergeError::UrlsNotUnique);
        }

        info!(
            "Merging {} into {} ({})",
            request.source.display(),
            request.destination.display(),
            request.format
        );

        let composition = {
            let source = request.source.clone();
            let destination = request.destination.clone();
            tokio::task::spawn_blocking(move || compose(&destination, &source))
                .await
                .map_err(|e| MergeError::failed(anyhow!("Decode task panicked: {}", e)))??
        };

        if !self.exporter.supports(request.format) {
            return Err(MergeError::ExportSessionError(request.format));
        }

        let (target, staging) = match &request.output {
            Some(output) => {
                remove_artifact(output);
                (output.clone(), None)
            }
            None => (request.destination.clone(), Some(staging_path(&request.destination))),
        };
        let write_path = staging.clone().unwrap_or_else(|| target.clone());

        let duration = composition.duration_seconds();
        debug!(
            "Exporting {} segments ({:.2}s) via {} to {}",
            composition.segment_count(),
            duration,
            self.exporter.name(),
            write_path.display()
        );

        match self.exporter.export(composition, request.format, &write_path).await {
            ExportOutcome::Completed => {}
            ExportOutcome::Failed(cause) => {
                if let Some(staging) = &staging {
                    remove_artifact(staging);
                }
                return Err(MergeError::failed(cause));
            }
            ExportOutcome::Cancelled => {
                if let Some(staging) = &staging {
                    remove_artifact(staging);
                }
                return Err(MergeError::Cancelled);
            }
        }

        if let Some(staging) = staging {
            // Never rename onto an existing file; some platforms append instead.
            remove_artifact(&target);
            fs::rename(&staging, &target)
                .with_context(|| format!("Failed to move merged audio into {:?}", target))
                .map_err(|e| {
                    remove_artifact(&staging);
                    MergeError::failed(e)
                })?;
        }

        if request.delete_source_on_success && !remove_artifact(&request.source) {
            warn!("Merged take was already gone: {}", request.source.display());
        }

        info!("Merge complete: {} ({:.2}s)", target.display(), duration);

        Ok(target)
    }
}

fn compose(destination: &Path, source: &Path) -> Result<Composition, MergeError> {
    let master = AudioFile::open(destination)
        .map_err(|e| MergeError::DestinationTrackError(format!("{:#}", e)))?;
    let take = AudioFile::open(source)
        .map_err(|e| MergeError::MergingTrackError(format!("{:#}", e)))?;

    let mut composition = Composition::starting_with(master);
    composition.append(take).map_err(MergeError::failed)?;
    Ok(composition)
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}
