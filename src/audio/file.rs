use anyhow::{anyhow, Context, Result};
use hound::{WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A fully decoded audio artifact (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode the first audio track of `path`
    ///
    /// WAV goes through hound; any other container is probed with symphonia.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening audio file: {}", path.display());

        let (sample_rate, channels, samples) = if is_riff(path)? {
            decode_wav(path)?
        } else {
            decode_with_symphonia(path)?
        };

        let duration_seconds = frames_to_seconds(samples.len(), sample_rate, channels);

        info!(
            "Audio file loaded: {} ({:.2}s, {}Hz, {} channels)",
            path.display(),
            duration_seconds,
            sample_rate,
            channels
        );

        Ok(Self {
            path: path.to_path_buf(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Write interleaved 16-bit PCM as a WAV file
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .context("Failed to write sample to WAV")?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;

    Ok(())
}

pub(crate) fn frames_to_seconds(samples: usize, sample_rate: u32, channels: u16) -> f64 {
    if sample_rate == 0 || channels == 0 {
        return 0.0;
    }
    samples as f64 / (sample_rate as f64 * channels as f64)
}

fn is_riff(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"RIFF"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to read audio header: {:?}", path)),
    }
}

fn decode_wav(path: &Path) -> Result<(u32, u16, Vec<i16>)> {
    let reader: WavReader<BufReader<File>> =
        WavReader::open(path).context("Failed to open WAV file")?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(anyhow!(
            "Unsupported WAV encoding: {:?} {} bits",
            spec.sample_format,
            spec.bits_per_sample
        ));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read audio samples")?;

    Ok((spec.sample_rate, spec.channels, samples))
}

fn decode_with_symphonia(path: &Path) -> Result<(u32, u16, Vec<i16>)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("No audio track found"))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut samples: Vec<i16> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode packet"),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);

        let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow!("No sample rate"))?;
    let channels = channels.ok_or_else(|| anyhow!("No channel layout"))?;

    Ok((sample_rate, channels, samples))
}
