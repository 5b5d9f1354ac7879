use crate::core::config::SfxConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::services::cues::CueExtractor;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct SfxCandidate {
    pub id: u64,
    pub name: String,
    pub preview_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SfxAsset {
    pub cue: String,
    pub path: PathBuf,
}

/// External sound-effect search and download.
#[async_trait]
pub trait SfxLookup: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn search(&self, term: &str) -> Result<Option<SfxCandidate>>;
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

// --- Freesound ---

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: u64,
    name: String,
    previews: HashMap<String, String>,
}

const PREVIEW_KEYS: &[&str] = &["preview-hq-mp3", "preview-lq-mp3"];

pub struct FreesoundClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl FreesoundClient {
    pub fn new(config: &SfxConfig) -> Result<Self> {
        let api_key = if config.enabled {
            config.api_key.clone().filter(|k| !k.trim().is_empty())
        } else {
            None
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn search_url(&self, term: &str) -> Result<Url> {
        let url = Url::parse_with_params(
            &format!("{}/search/text/", self.base_url),
            &[
                ("query", term),
                ("fields", "id,name,previews"),
                ("page_size", "1"),
            ],
        )?;
        Ok(url)
    }
}

#[async_trait]
impl SfxLookup for FreesoundClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, term: &str) -> Result<Option<SfxCandidate>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Freesound API key is not set"))?;
        let resp = self
            .client
            .get(self.search_url(term)?)
            .header("Authorization", format!("Token {}", api_key))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Freesound search failed: {}", resp.status()));
        }
        let body: SearchResponse = resp.json().await.context("Invalid Freesound response")?;

        Ok(body.results.into_iter().next().and_then(|r| {
            let preview = PREVIEW_KEYS.iter().find_map(|k| r.previews.get(*k))?.clone();
            Some(SfxCandidate {
                id: r.id,
                name: r.name,
                preview_url: preview,
            })
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Preview download failed: {}", resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

// --- Resolver ---

type Slot = Arc<OnceCell<Result<SfxAsset, String>>>;

/// Run-scoped cue-to-file cache.
///
/// Each cue is looked up at most once per run, even when segments resolve it
/// concurrently; failed lookups are remembered as unavailable for the run.
pub struct SfxResolver {
    lookup: Arc<dyn SfxLookup>,
    cues: CueExtractor,
    cache_dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SfxResolver {
    pub fn new(lookup: Arc<dyn SfxLookup>, cues: CueExtractor, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            lookup,
            cues,
            cache_dir: cache_dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the local asset for `cue`, or `PipelineError::SfxUnavailable`.
    pub async fn resolve(&self, cue: &str) -> PipelineResult<SfxAsset> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(cue.to_string()).or_default().clone()
        };
        slot.get_or_init(|| async {
            self.load(cue).await.map_err(|e| format!("{:#}", e))
        })
        .await
        .clone()
        .map_err(|reason| PipelineError::SfxUnavailable {
            cue: cue.to_string(),
            reason,
        })
    }

    async fn load(&self, cue: &str) -> Result<SfxAsset> {
        let path = self.asset_path(cue);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(SfxAsset {
                cue: cue.to_string(),
                path,
            });
        }
        if !self.lookup.is_configured() {
            return Err(anyhow!("no sound-effect credentials configured"));
        }

        let term = self.cues.search_term(cue);
        let candidate = self
            .lookup
            .search(&term)
            .await?
            .ok_or_else(|| anyhow!("no results for '{}'", term))?;
        debug!("Sound effect '{}' -> #{} {}", cue, candidate.id, candidate.name);

        let audio = self.lookup.fetch(&candidate.preview_url).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(&path, audio).await?;
        info!("Fetched sound effect '{}' ({})", cue, candidate.name);
        Ok(SfxAsset {
            cue: cue.to_string(),
            path,
        })
    }

    fn asset_path(&self, cue: &str) -> PathBuf {
        let safe: String = cue
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Path::new(&self.cache_dir).join(format!("{}.mp3", safe))
    }
}
