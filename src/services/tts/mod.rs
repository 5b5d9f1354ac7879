use crate::core::config::Config;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::workspace::RunWorkspace;
use crate::services::cues::EmotionParams;
use crate::services::media::{FilterGraph, MediaEngine, MediaInput, MediaJob};
use crate::services::script::split_into_chunks;
use crate::utils::audio::merge_encoded_parts;
use async_trait::async_trait;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

pub mod unreal_speech;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub speed: f64,
    pub pitch: f64,
    pub volume: f64,
}

impl SynthesisRequest {
    pub fn new(text: &str, voice_id: &str, emotion: EmotionParams) -> Self {
        Self {
            text: text.to_string(),
            voice_id: voice_id.to_string(),
            speed: emotion.speed,
            pitch: emotion.pitch,
            volume: emotion.volume,
        }
    }
}

/// Remote text-to-speech capability returning encoded audio.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> PipelineResult<Vec<u8>>;
}

pub fn create_tts_client(config: &Config) -> PipelineResult<Arc<dyn TtsClient>> {
    info!("Initializing TTS client at {}", config.tts.base_url);
    Ok(Arc::new(unreal_speech::UnrealSpeechClient::new(&config.tts)?))
}

/// Appends a period unless the text already ends a sentence.
pub fn ensure_terminal_punctuation(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?', '…']) {
        text.to_string()
    } else {
        format!("{}.", text)
    }
}

/// Turns text into a padded raw take on disk.
///
/// Long texts are sent in sentence-aligned chunks whose encoded bytes are
/// joined in order. Every take ends with `pad_seconds` of silence.
pub struct Synthesizer {
    tts: Arc<dyn TtsClient>,
    engine: Arc<dyn MediaEngine>,
    max_chunk_chars: usize,
    pad_seconds: f64,
}

impl Synthesizer {
    pub fn new(
        tts: Arc<dyn TtsClient>,
        engine: Arc<dyn MediaEngine>,
        max_chunk_chars: usize,
        pad_seconds: f64,
    ) -> Self {
        Self {
            tts,
            engine,
            max_chunk_chars,
            pad_seconds,
        }
    }

    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        emotion: EmotionParams,
        workspace: &RunWorkspace,
    ) -> PipelineResult<PathBuf> {
        let text = ensure_terminal_punctuation(text);
        let chunks = split_into_chunks(&text, self.max_chunk_chars);

        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let request = SynthesisRequest::new(chunk, voice_id, emotion);
            parts.push(self.tts.synthesize(&request).await?);
        }
        debug!("Synthesized {} chunk(s) with voice {}", parts.len(), voice_id);

        let raw_path = workspace.file("raw", "mp3");
        tokio::fs::write(&raw_path, merge_encoded_parts(&parts)?).await?;

        let padded_path = workspace.file("take", "mp3");
        let job = MediaJob {
            inputs: vec![
                MediaInput::File(raw_path),
                MediaInput::Silence {
                    seconds: self.pad_seconds,
                },
            ],
            graph: FilterGraph::Concat,
            output: padded_path.clone(),
        };
        self.engine
            .run(&job)
            .await
            .map_err(|e| PipelineError::EffectApplication(format!("silence pad: {:#}", e)))?;
        Ok(padded_path)
    }
}
