//! Analyzes WAV files and writes one JSON document with the onset control
//! stream per file.
//!
//! An input may also be a directory; all WAV files directly inside of it are
//! analyzed in the order of their names.
//!
//! The onsets and beats of `<stem>.wav` are read from the sidecar file
//! `<stem>.onsets.json` written by an external detector:
//!
//! ```json
//! { "onset_samples": [512, 20480], "beat_samples": [0, 22050, 44100] }
//! ```

use clap::{Parser, ValueEnum};
use onset_features::audio_preprocessing::conversion::{
    i16_sample_to_f32, int_sample_to_f32, interleaved_to_mono,
};
use onset_features::batch::{run_batch, AnalysisJob, BatchSummary, DEFAULT_WORKERS};
use onset_features::{AnalysisConfig, OnsetAnalyzer, OutputSeries, SpectralBackend};
use serde::{Deserialize, Serialize};
use simple_logger::SimpleLogger;
use std::fs::{self, File};
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    name = "onset-analyzer",
    version,
    about = "Extracts per-onset envelope and brightness features aligned to the beat grid"
)]
struct Args {
    /// WAV files, or directories containing WAV files, to analyze.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the `<stem>_analysis.json` files.
    #[arg(long, short, default_value = "output")]
    output: PathBuf,

    /// Number of files analyzed in parallel.
    #[arg(long, short, default_value_t = DEFAULT_WORKERS)]
    jobs: usize,

    /// TOML file with analysis parameters. Missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the spectral backend of the config.
    #[arg(long, value_enum)]
    spectral: Option<SpectralArg>,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

/// File extensions picked up from input directories.
const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "wave"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SpectralArg {
    Fft,
    FilterBank,
}

impl From<SpectralArg> for SpectralBackend {
    fn from(arg: SpectralArg) -> Self {
        match arg {
            SpectralArg::Fft => Self::Fft,
            SpectralArg::FilterBank => Self::FilterBank,
        }
    }
}

/// Output of the external onset and beat detector.
#[derive(Debug, Deserialize)]
struct Detections {
    onset_samples: Vec<usize>,
    #[serde(default)]
    beat_samples: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct AnalysisDocument<'a> {
    filename: &'a str,
    analysis: &'a OutputSeries,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("can't read config {}: {}", .0.display(), .1)]
    ReadConfig(PathBuf, #[source] std::io::Error),
    #[error("invalid config {}: {}", .0.display(), .1)]
    ParseConfig(PathBuf, #[source] toml::de::Error),
    #[error(transparent)]
    InvalidConfig(#[from] onset_features::InvalidConfigError),
    #[error(transparent)]
    Batch(#[from] onset_features::batch::BatchError),
    #[error("can't create output directory {}: {}", .0.display(), .1)]
    OutputDir(PathBuf, #[source] std::io::Error),
    #[error("can't list directory {}: {}", .0.display(), .1)]
    ReadDir(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Error)]
enum LoadError {
    #[error("can't decode WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("WAV file has no channels")]
    NoChannels,
    #[error("can't read {}: {}", .0.display(), .1)]
    Sidecar(PathBuf, #[source] std::io::Error),
    #[error("invalid detections in {}: {}", .0.display(), .1)]
    Detections(PathBuf, #[source] serde_json::Error),
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("can't create {}: {}", .0.display(), .1)]
    Create(PathBuf, #[source] std::io::Error),
    #[error("can't write {}: {}", .0.display(), .1)]
    Serialize(PathBuf, #[source] serde_json::Error),
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = SimpleLogger::new().with_level(args.log_level).init() {
        eprintln!("can't initialize logger: {e}");
    }

    match run(&args) {
        Ok(summary) => {
            log::info!(
                "{} files analyzed, {} failed",
                summary.succeeded,
                summary.failed
            );
            if summary.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<BatchSummary, CliError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(spectral) = args.spectral {
        config.spectral_backend = spectral.into();
    }
    let analyzer = OnsetAnalyzer::new(config)?;
    let inputs = expand_inputs(&args.inputs)?;

    fs::create_dir_all(&args.output).map_err(|e| CliError::OutputDir(args.output.clone(), e))?;

    let outcomes = run_batch(&analyzer, inputs.as_slice(), args.jobs, load_job)?;

    let mut summary = BatchSummary::default();
    for (outcome, input) in outcomes.iter().zip(&inputs) {
        let written = match &outcome.result {
            Ok(series) => write_document(&args.output, input, series)
                .map_err(|e| log::error!("{}: {e}", outcome.name))
                .is_ok(),
            Err(_) => false,
        };
        if written {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
    }
    Ok(summary)
}

/// Replaces every directory of `inputs` by the audio files inside of it,
/// sorted by name.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, CliError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut entries = fs::read_dir(input)
            .map_err(|e| CliError::ReadDir(input.clone(), e))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_audio_file(path))
            .collect::<Vec<_>>();
        entries.sort();
        if entries.is_empty() {
            log::warn!("no audio files in {}", input.display());
        }
        files.extend(entries);
    }
    Ok(files)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|valid| ext.eq_ignore_ascii_case(valid))
        })
}

fn load_config(path: &Path) -> Result<AnalysisConfig, CliError> {
    let text =
        fs::read_to_string(path).map_err(|e| CliError::ReadConfig(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| CliError::ParseConfig(path.to_path_buf(), e))
}

fn load_job(path: &Path) -> Result<AnalysisJob, LoadError> {
    let (signal, sample_rate) = read_wav_to_mono(path)?;

    let sidecar = path.with_extension("onsets.json");
    let text =
        fs::read_to_string(&sidecar).map_err(|e| LoadError::Sidecar(sidecar.clone(), e))?;
    let detections: Detections =
        serde_json::from_str(&text).map_err(|e| LoadError::Detections(sidecar, e))?;

    Ok(AnalysisJob {
        signal,
        sample_rate,
        onset_samples: detections.onset_samples,
        beat_samples: detections.beat_samples,
    })
}

/// Reads a WAV file and down-mixes it to mono. Additionally, it returns the
/// sampling rate of the file.
fn read_wav_to_mono(path: &Path) -> Result<(Vec<f32>, u32), LoadError> {
    let mut reader = hound::WavReader::open(path)?;
    let header = reader.spec();
    let channels =
        NonZeroUsize::new(usize::from(header.channels)).ok_or(LoadError::NoChannels)?;

    let interleaved = match (header.sample_format, header.bits_per_sample) {
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(i16_sample_to_f32))
            .collect::<Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, bits) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| int_sample_to_f32(s, bits)))
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok((interleaved_to_mono(&interleaved, channels), header.sample_rate))
}

fn write_document(dir: &Path, input: &Path, series: &OutputSeries) -> Result<(), WriteError> {
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path = dir.join(format!("{stem}_analysis.json"));

    let file = File::create(&path).map_err(|e| WriteError::Create(path.clone(), e))?;
    let document = AnalysisDocument {
        filename: &filename,
        analysis: series,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &document)
        .map_err(|e| WriteError::Serialize(path.clone(), e))?;
    log::info!("{filename}: {} onsets -> {}", series.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    #[test]
    fn directories_expand_to_sorted_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.WAV", "c.wave", "notes.txt", "b.onsets.json"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.wav")).unwrap();
        let single = PathBuf::from("elsewhere/track.wav");

        let files = expand_inputs(&[single.clone(), dir.path().to_path_buf()]).unwrap();
        check!(
            files
                == vec![
                    single,
                    dir.path().join("a.WAV"),
                    dir.path().join("b.wav"),
                    dir.path().join("c.wave"),
                ]
        );
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        fs::write(&path, "gap_boost = 0.5\nspectral_backend = \"filter-bank\"\n").unwrap();

        let config = load_config(&path).unwrap();
        check!(
            config
                == AnalysisConfig {
                    gap_boost: 0.5,
                    spectral_backend: SpectralBackend::FilterBank,
                    ..Default::default()
                }
        );
        check!(matches!(
            load_config(&dir.path().join("missing.toml")),
            Err(CliError::ReadConfig(..))
        ));
    }

    #[test]
    fn document_wraps_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let series = OutputSeries {
            onset_times: vec![0.25],
            beat_positions: vec![0.5],
            onset_strength: vec![1.0],
            onset_contrast: vec![0.5],
            onset_spread: vec![0.5],
        };
        write_document(dir.path(), Path::new("in/loop.wav"), &series).unwrap();

        let text = fs::read_to_string(dir.path().join("loop_analysis.json")).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        check!(document["filename"] == "loop.wav");
        check!(document["analysis"]["num_onsets"] == 1);
        check!(document["analysis"]["onset_times"] == serde_json::json!([0.25]));
        check!(document["analysis"]["beat_positions"] == serde_json::json!([0.5]));
        check!(document["analysis"]["onset_strength"] == serde_json::json!([1.0]));
        check!(document["analysis"]["onset_contrast"] == serde_json::json!([0.5]));
        check!(document["analysis"]["onset_spread"] == serde_json::json!([0.5]));
        check!(document.as_object().unwrap().len() == 2);
    }
}
