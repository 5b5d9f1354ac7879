//! Typed audio filter graphs and the engine that renders them.
//!
//! Pipeline stages describe what they want as a [`MediaJob`]; only
//! [`FfmpegEngine`] knows the textual filter grammar.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::process::Command;

use crate::core::config::MediaConfig;

/// Encoder used for every rendered file, and requested from the speech service.
pub const OUTPUT_CODEC: &str = "libmp3lame";
pub const OUTPUT_BITRATE: &str = "256k";

#[derive(Debug, Clone, PartialEq)]
pub struct ReverbPreset {
    pub in_gain: f64,
    pub out_gain: f64,
    pub delays_ms: Vec<u32>,
    pub decays: Vec<f64>,
}

impl ReverbPreset {
    pub fn standard() -> Self {
        Self {
            in_gain: 0.8,
            out_gain: 0.9,
            delays_ms: vec![60, 60],
            decays: vec![0.4, 0.3],
        }
    }

    /// Longer taps and more feedback for voices that should sound far off.
    pub fn distant() -> Self {
        Self {
            in_gain: 0.9,
            out_gain: 0.95,
            delays_ms: vec![250, 500],
            decays: vec![0.5, 0.45],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Periodic left-right sweep.
    PanOscillating { hz: f64 },
    /// Fixed per-channel gains.
    PanStatic { left: f64, right: f64 },
    Volume(f64),
    Reverb(ReverbPreset),
    Loudnorm,
}

impl Filter {
    pub fn to_ffmpeg(&self) -> String {
        match self {
            Filter::PanOscillating { hz } => format!("apulsator=hz={}", hz),
            Filter::PanStatic { left, right } => format!(
                "aformat=channel_layouts=stereo,pan=stereo|c0={}*c0|c1={}*c1",
                left, right
            ),
            Filter::Volume(v) => format!("volume={}", v),
            Filter::Reverb(preset) => format!(
                "aecho={}:{}:{}:{}",
                preset.in_gain,
                preset.out_gain,
                join(&preset.delays_ms),
                join(&preset.decays)
            ),
            Filter::Loudnorm => "loudnorm".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaInput {
    File(PathBuf),
    /// Generated silence of the given length.
    Silence { seconds: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterGraph {
    /// Filters applied in order to the single input.
    Chain(Vec<Filter>),
    /// Weighted mix of every input; the first input sets the duration.
    Mix {
        gains: Vec<f64>,
        dropout_transition: f64,
        /// Filters applied to the mixed stream.
        post: Vec<Filter>,
    },
    /// Inputs appended end to end in order.
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaJob {
    pub inputs: Vec<MediaInput>,
    pub graph: FilterGraph,
    pub output: PathBuf,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn run(&self, job: &MediaJob) -> Result<()>;
}

pub struct FfmpegEngine {
    bin: String,
}

impl FfmpegEngine {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            bin: config.ffmpeg_bin.clone(),
        }
    }

    pub fn build_args(&self, job: &MediaJob) -> Result<Vec<String>> {
        if job.inputs.is_empty() {
            return Err(anyhow!("media job has no inputs"));
        }
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for input in &job.inputs {
            match input {
                MediaInput::File(path) => {
                    args.push("-i".to_string());
                    args.push(path.to_string_lossy().to_string());
                }
                MediaInput::Silence { seconds } => {
                    args.extend([
                        "-f".to_string(),
                        "lavfi".to_string(),
                        "-t".to_string(),
                        seconds.to_string(),
                        "-i".to_string(),
                        "anullsrc=r=24000:cl=mono".to_string(),
                    ]);
                }
            }
        }

        match &job.graph {
            FilterGraph::Chain(filters) => {
                if job.inputs.len() != 1 {
                    return Err(anyhow!(
                        "filter chain expects one input, got {}",
                        job.inputs.len()
                    ));
                }
                if !filters.is_empty() {
                    let chain = filters
                        .iter()
                        .map(Filter::to_ffmpeg)
                        .collect::<Vec<_>>()
                        .join(",");
                    args.push("-af".to_string());
                    args.push(chain);
                }
            }
            FilterGraph::Mix {
                gains,
                dropout_transition,
                post,
            } => {
                if gains.len() != job.inputs.len() {
                    return Err(anyhow!(
                        "mix has {} gains for {} inputs",
                        gains.len(),
                        job.inputs.len()
                    ));
                }
                let mut graph = String::new();
                for (i, gain) in gains.iter().enumerate() {
                    write!(graph, "[{}:a]volume={}[a{}];", i, gain, i)?;
                }
                for i in 0..gains.len() {
                    write!(graph, "[a{}]", i)?;
                }
                write!(
                    graph,
                    "amix=inputs={}:duration=first:dropout_transition={}",
                    gains.len(),
                    dropout_transition
                )?;
                for filter in post {
                    write!(graph, ",{}", filter.to_ffmpeg())?;
                }
                graph.push_str("[out]");
                push_complex(&mut args, graph);
            }
            FilterGraph::Concat => {
                let mut graph = String::new();
                for i in 0..job.inputs.len() {
                    write!(graph, "[{}:a]", i)?;
                }
                write!(graph, "concat=n={}:v=0:a=1[out]", job.inputs.len())?;
                push_complex(&mut args, graph);
            }
        }

        args.extend([
            "-codec:a".to_string(),
            OUTPUT_CODEC.to_string(),
            "-b:a".to_string(),
            OUTPUT_BITRATE.to_string(),
            job.output.to_string_lossy().to_string(),
        ]);
        Ok(args)
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn run(&self, job: &MediaJob) -> Result<()> {
        let args = self.build_args(job)?;
        debug!("{} {}", self.bin, args.join(" "));

        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

fn push_complex(args: &mut Vec<String>, graph: String) {
    args.push("-filter_complex".to_string());
    args.push(graph);
    args.push("-map".to_string());
    args.push("[out]".to_string());
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FfmpegEngine {
        FfmpegEngine::new(&MediaConfig::default())
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_filter_serialization() {
        assert_eq!(Filter::PanOscillating { hz: 0.2 }.to_ffmpeg(), "apulsator=hz=0.2");
        assert_eq!(
            Filter::PanStatic { left: 2.0, right: 0.0 }.to_ffmpeg(),
            "aformat=channel_layouts=stereo,pan=stereo|c0=2*c0|c1=0*c1"
        );
        assert_eq!(
            Filter::Reverb(ReverbPreset::standard()).to_ffmpeg(),
            "aecho=0.8:0.9:60|60:0.4|0.3"
        );
        assert_eq!(Filter::Volume(0.7).to_ffmpeg(), "volume=0.7");
        assert_eq!(Filter::Loudnorm.to_ffmpeg(), "loudnorm");
    }

    #[test]
    fn test_chain_args() -> Result<()> {
        let job = MediaJob {
            inputs: vec![MediaInput::File("raw.mp3".into())],
            graph: FilterGraph::Chain(vec![
                Filter::PanOscillating { hz: 0.2 },
                Filter::Reverb(ReverbPreset::standard()),
                Filter::Loudnorm,
            ]),
            output: "fx.mp3".into(),
        };
        let args = engine().build_args(&job)?;
        let af = position(&args, "-af");
        assert_eq!(args[af + 1], "apulsator=hz=0.2,aecho=0.8:0.9:60|60:0.4|0.3,loudnorm");
        assert_eq!(args[position(&args, "-codec:a") + 1], "libmp3lame");
        assert_eq!(args[position(&args, "-b:a") + 1], "256k");
        assert_eq!(args.last().map(String::as_str), Some("fx.mp3"));
        Ok(())
    }

    #[test]
    fn test_mix_args() -> Result<()> {
        let job = MediaJob {
            inputs: vec![
                MediaInput::File("voice.mp3".into()),
                MediaInput::File("rain.mp3".into()),
            ],
            graph: FilterGraph::Mix {
                gains: vec![1.2, 0.18],
                dropout_transition: 0.5,
                post: vec![Filter::Loudnorm],
            },
            output: "mixed.mp3".into(),
        };
        let args = engine().build_args(&job)?;
        let fc = position(&args, "-filter_complex");
        assert_eq!(
            args[fc + 1],
            "[0:a]volume=1.2[a0];[1:a]volume=0.18[a1];[a0][a1]amix=inputs=2:duration=first:dropout_transition=0.5,loudnorm[out]"
        );
        assert_eq!(args[fc + 3], "[out]");
        Ok(())
    }

    #[test]
    fn test_concat_with_silence_args() -> Result<()> {
        let job = MediaJob {
            inputs: vec![
                MediaInput::File("take.mp3".into()),
                MediaInput::Silence { seconds: 0.3 },
            ],
            graph: FilterGraph::Concat,
            output: "padded.mp3".into(),
        };
        let args = engine().build_args(&job)?;
        assert!(args.contains(&"anullsrc=r=24000:cl=mono".to_string()));
        assert_eq!(args[position(&args, "-t") + 1], "0.3");
        let fc = position(&args, "-filter_complex");
        assert_eq!(args[fc + 1], "[0:a][1:a]concat=n=2:v=0:a=1[out]");
        Ok(())
    }

    #[test]
    fn test_invalid_jobs_are_rejected() {
        let empty = MediaJob {
            inputs: vec![],
            graph: FilterGraph::Concat,
            output: "out.mp3".into(),
        };
        assert!(engine().build_args(&empty).is_err());

        let mismatched = MediaJob {
            inputs: vec![MediaInput::File("a.mp3".into())],
            graph: FilterGraph::Mix {
                gains: vec![1.2, 0.18],
                dropout_transition: 0.5,
                post: Vec::new(),
            },
            output: "out.mp3".into(),
        };
        assert!(engine().build_args(&mismatched).is_err());
    }
}
