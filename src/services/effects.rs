use crate::core::error::{PipelineError, PipelineResult};
use crate::core::workspace::RunWorkspace;
use crate::services::cues::SpatialCues;
use crate::services::media::{Filter, FilterGraph, MediaEngine, MediaInput, MediaJob, ReverbPreset};
use crate::services::sfx::SfxResolver;
use log::{debug, warn};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const NARRATION_MIX_GAIN: f64 = 1.2;
pub const SFX_MIX_GAIN: f64 = 0.18;
pub const MIX_DROPOUT_TRANSITION: f64 = 0.5;
pub const DISTANT_ATTENUATION: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub enum PanMode {
    Oscillating { hz: f64 },
    Static { position: f64 },
}

impl PanMode {
    /// Centered, undirected voices sweep; anything else is pinned.
    pub fn from_cues(spatial: &SpatialCues, oscillation_hz: f64) -> Self {
        if spatial.pan_position == 0.0 && !spatial.directional_override {
            PanMode::Oscillating { hz: oscillation_hz }
        } else {
            PanMode::Static {
                position: spatial.pan_position.clamp(-1.0, 1.0),
            }
        }
    }

    pub fn filter(&self) -> Filter {
        match self {
            PanMode::Oscillating { hz } => Filter::PanOscillating { hz: *hz },
            PanMode::Static { position } => Filter::PanStatic {
                left: (1.0 - position).max(0.0),
                right: (1.0 + position).max(0.0),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectParams {
    pub pan: PanMode,
    pub reverb: ReverbPreset,
    pub attenuation: Option<f64>,
    pub sfx: Vec<String>,
}

impl EffectParams {
    pub fn new(spatial: &SpatialCues, distant: bool, oscillation_hz: f64) -> Self {
        let (reverb, attenuation) = if distant {
            (ReverbPreset::distant(), Some(DISTANT_ATTENUATION))
        } else {
            (ReverbPreset::standard(), None)
        };
        Self {
            pan: PanMode::from_cues(spatial, oscillation_hz),
            reverb,
            attenuation,
            sfx: spatial.sfx.clone(),
        }
    }

    /// Pan, optional attenuation, reverb, then loudness normalization last.
    pub fn chain(&self) -> Vec<Filter> {
        let mut filters = vec![self.pan.filter()];
        if let Some(gain) = self.attenuation {
            filters.push(Filter::Volume(gain));
        }
        filters.push(Filter::Reverb(self.reverb.clone()));
        filters.push(Filter::Loudnorm);
        filters
    }
}

/// Sweep rate around `base_hz`, varied by up to `jitter_hz` per call.
pub fn jittered_rate(base_hz: f64, jitter_hz: f64) -> f64 {
    let jitter = jitter_hz.abs();
    let offset = if jitter > 0.0 {
        rand::rng().random_range(-jitter..=jitter)
    } else {
        0.0
    };
    ((base_hz + offset).max(0.01) * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSegment {
    pub path: PathBuf,
    pub mixed_sfx: Vec<String>,
    pub skipped_sfx: Vec<String>,
}

pub struct EffectChain {
    engine: Arc<dyn MediaEngine>,
    resolver: Arc<SfxResolver>,
}

impl EffectChain {
    pub fn new(engine: Arc<dyn MediaEngine>, resolver: Arc<SfxResolver>) -> Self {
        Self { engine, resolver }
    }

    /// Renders one raw take. When at least one sound effect resolves, the take
    /// is mixed with the effects instead of going through the pan/reverb
    /// chain; the two paths never combine.
    pub async fn apply(
        &self,
        raw: &Path,
        params: &EffectParams,
        workspace: &RunWorkspace,
    ) -> PipelineResult<ProcessedSegment> {
        let mut assets = Vec::new();
        let mut skipped_sfx = Vec::new();
        for cue in &params.sfx {
            match self.resolver.resolve(cue).await {
                Ok(asset) => assets.push(asset),
                Err(e) if !e.is_fatal() => {
                    warn!("Skipping sound effect: {}", e);
                    skipped_sfx.push(cue.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let output = workspace.file("fx", "mp3");
        let job = if assets.is_empty() {
            MediaJob {
                inputs: vec![MediaInput::File(raw.to_path_buf())],
                graph: FilterGraph::Chain(params.chain()),
                output: output.clone(),
            }
        } else {
            let mut inputs = vec![MediaInput::File(raw.to_path_buf())];
            let mut gains = vec![NARRATION_MIX_GAIN];
            for asset in &assets {
                inputs.push(MediaInput::File(asset.path.clone()));
                gains.push(SFX_MIX_GAIN);
            }
            MediaJob {
                inputs,
                graph: FilterGraph::Mix {
                    gains,
                    dropout_transition: MIX_DROPOUT_TRANSITION,
                    post: vec![Filter::Loudnorm],
                },
                output: output.clone(),
            }
        };

        debug!("Applying effects to {:?} -> {:?}", raw, output);
        self.engine
            .run(&job)
            .await
            .map_err(|e| PipelineError::EffectApplication(format!("{:#}", e)))?;

        Ok(ProcessedSegment {
            path: output,
            mixed_sfx: assets.into_iter().map(|a| a.cue).collect(),
            skipped_sfx,
        })
    }
}
