use crate::core::config::TtsConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::services::media::{OUTPUT_BITRATE, OUTPUT_CODEC};
use crate::services::tts::{SynthesisRequest, TtsClient};
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct StreamRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    bitrate: &'static str,
    speed: f64,
    pitch: f64,
    volume: f64,
    codec: &'static str,
}

pub struct UnrealSpeechClient {
    api_key: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl UnrealSpeechClient {
    pub fn new(config: &TtsConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            endpoint: format!("{}/stream", config.base_url.trim_end_matches('/')),
            client,
        })
    }

    fn body<'a>(&'a self, request: &'a SynthesisRequest) -> StreamRequest<'a> {
        StreamRequest {
            text: &request.text,
            voice_id: &request.voice_id,
            bitrate: OUTPUT_BITRATE,
            speed: request.speed,
            pitch: request.pitch,
            volume: request.volume,
            codec: OUTPUT_CODEC,
        }
    }
}

#[async_trait]
impl TtsClient for UnrealSpeechClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> PipelineResult<Vec<u8>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration("Unreal Speech API key is not set".to_string())
        })?;

        debug!(
            "POST {} voice={} ({} chars)",
            self.endpoint,
            request.voice_id,
            request.text.len()
        );
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| PipelineError::Synthesis(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Synthesis(format!(
                "Unreal Speech API error {}: {}",
                status, err_text
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Synthesis(format!("reading audio failed: {}", e)))?;
        Ok(audio.to_vec())
    }
}
