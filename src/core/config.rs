use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    /// Segments rendered at once. 1 keeps the sequential reference behavior.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub sfx: SfxConfig,

    #[serde(default)]
    pub effects: EffectsConfig,

    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_tts_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default)]
    pub voices: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_narrator_voice")]
    pub narrator: String,
    #[serde(default = "default_male_voice")]
    pub male_character: String,
    #[serde(default = "default_female_voice")]
    pub female_character: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SfxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub api_key: Option<String>,
    #[serde(default = "default_sfx_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EffectsConfig {
    #[serde(default = "default_narrator_pan_hz")]
    pub narrator_pan_hz: f64,
    #[serde(default = "default_pan_jitter_hz")]
    pub pan_jitter_hz: f64,
    #[serde(default = "default_character_pan_hz")]
    pub character_pan_hz: f64,
    #[serde(default = "default_pad_seconds")]
    pub pad_seconds: f64,
    #[serde(default = "default_true")]
    pub strip_role_labels: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_tts_base_url() -> String {
    "https://api.v8.unrealspeech.com".to_string()
}
fn default_max_chunk_chars() -> usize {
    950
}
fn default_narrator_voice() -> String {
    "af_nicole".to_string()
}
fn default_male_voice() -> String {
    "am_michael".to_string()
}
fn default_female_voice() -> String {
    "af_bella".to_string()
}
fn default_sfx_base_url() -> String {
    "https://freesound.org/apiv2".to_string()
}
fn default_narrator_pan_hz() -> f64 {
    0.18
}
fn default_pan_jitter_hz() -> f64 {
    0.04
}
fn default_character_pan_hz() -> f64 {
    0.2
}
fn default_pad_seconds() -> f64 {
    0.3
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_folder: default_input(),
            output_folder: default_output(),
            build_folder: default_build(),
            concurrency: default_concurrency(),
            tts: TtsConfig::default(),
            sfx: SfxConfig::default(),
            effects: EffectsConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_tts_base_url(),
            max_chunk_chars: default_max_chunk_chars(),
            voices: VoiceConfig::default(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            narrator: default_narrator_voice(),
            male_character: default_male_voice(),
            female_character: default_female_voice(),
        }
    }
}

impl Default for SfxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_sfx_base_url(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            narrator_pan_hz: default_narrator_pan_hz(),
            pan_jitter_hz: default_pan_jitter_hz(),
            character_pan_hz: default_character_pan_hz(),
            pad_seconds: default_pad_seconds(),
            strip_role_labels: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env_credentials();
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }

    /// Credentials left out of the file are read from the environment.
    pub fn apply_env_credentials(&mut self) {
        if self.tts.api_key.is_none() {
            self.tts.api_key = std::env::var("UNREAL_SPEECH_API_KEY").ok();
        }
        if self.sfx.api_key.is_none() {
            self.sfx.api_key = std::env::var("FREESOUND_API_KEY").ok();
        }
    }
}
