use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use take_recorder::audio::{ClockPlayback, NullRoute, ToneCapture, ToneSettings};
use take_recorder::{
    AudioFile, AudioPort, Config, Devices, OutputFormat, RecordingSession, SessionState,
    SessionUpdate, WavExporter,
};

/// Record a few takes on simulated devices, preview them and save the result
#[derive(Debug, Parser)]
#[command(name = "take-recorder", version)]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/take-recorder")]
    config: String,

    /// Number of takes to record
    #[arg(long, default_value_t = 2)]
    takes: u32,

    /// Length of each take in seconds
    #[arg(long, default_value_t = 1.0)]
    take_secs: f64,

    /// How long to preview the recording before saving, in seconds
    #[arg(long, default_value_t = 0.5)]
    preview_secs: f64,

    /// Output container
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Directory for takes and the merged recording
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Route preview playback to the loudspeaker
    #[arg(long)]
    speaker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.takes == 0 {
        bail!("--takes must be at least 1");
    }

    let mut cfg = Config::load(&args.config)?;
    if let Some(format) = args.format {
        cfg.recorder.output_format = format;
    }
    if let Some(dir) = args.output_dir {
        cfg.recorder.storage_dir = dir;
    }
    if args.speaker {
        cfg.recorder.default_port = AudioPort::Speaker;
    }

    info!("Take Recorder v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Recording {} takes of {:.1}s as {} into {}",
        args.takes,
        args.take_secs,
        cfg.recorder.output_format,
        cfg.recorder.storage_dir.display()
    );

    let devices = Devices {
        capture: Box::new(ToneCapture::new(ToneSettings::from(&cfg.capture))),
        playback: Box::new(ClockPlayback::new()),
        route: Box::new(NullRoute::default()),
        exporter: Arc::new(WavExporter),
    };

    let (session, updates) = RecordingSession::start(cfg.recorder.clone(), devices)?;
    let printer = tokio::spawn(print_updates(updates));

    let take_len = Duration::from_secs_f64(args.take_secs);
    for take in 1..=args.takes {
        session.record().await?;
        tokio::time::sleep(take_len).await;
        let state = session.record().await?;
        info!("Take {} done ({})", take, state);
    }

    // Preview requests queue behind the last merge
    session.toggle_playback().await?;
    tokio::time::sleep(Duration::from_secs_f64(args.preview_secs)).await;
    if session.stats().await?.state == SessionState::Playing {
        session.toggle_playback().await?;
    }

    let stats = session.stats().await?;
    let state = session.save().await?;
    if state != SessionState::Saved {
        warn!("Session ended as {}", state);
    }
    drop(session);

    let saved = printer.await.context("Update printer panicked")?;
    let Some(path) = saved else {
        bail!("Session finished without saving a recording");
    };

    let audio = AudioFile::open(&path)?;
    info!(
        "Saved {} takes, {:.2}s at {}Hz ({} channels)",
        stats.takes, audio.duration_seconds, audio.sample_rate, audio.channels
    );
    println!("{}", path.display());

    Ok(())
}

/// Print every update as a JSON line; returns the saved artifact, if any
async fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) -> Option<PathBuf> {
    let mut saved = None;
    while let Some(update) = updates.recv().await {
        match serde_json::to_string(&update) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize update: {}", e),
        }
        if let SessionUpdate::DidSave { artifact } = update {
            saved = Some(artifact);
        }
    }
    saved
}
