use crate::core::config::Config;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::workspace::RunWorkspace;
use crate::services::cues::{CueExtractor, EmotionParams};
use crate::services::effects::{jittered_rate, EffectChain, EffectParams};
use crate::services::media::{FfmpegEngine, FilterGraph, MediaEngine, MediaInput, MediaJob};
use crate::services::script::{strip_role_label, LineClassification, Role, Story};
use crate::services::sfx::{FreesoundClient, SfxLookup, SfxResolver};
use crate::services::tts::{create_tts_client, Synthesizer, TtsClient};
use futures_util::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stages a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Collecting,
    NarratorSynthesized,
    CharactersSynthesized,
    Ordered,
    Concatenated,
}

/// Narrator lines, in story order, and character lines keyed by index.
#[derive(Debug, Default)]
pub struct Partition {
    pub narrator: Vec<LineClassification>,
    pub characters: BTreeMap<usize, LineClassification>,
}

impl Partition {
    pub fn from_lines(lines: Vec<LineClassification>) -> Self {
        let mut partition = Partition::default();
        for line in lines {
            if line.role.is_narrator() {
                partition.narrator.push(line);
            } else {
                partition.characters.insert(line.index, line);
            }
        }
        partition
    }
}

/// Everything needed to render one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    /// Smallest story line index the segment covers.
    pub key: usize,
    pub role: Role,
    pub text: String,
    pub emotion: EmotionParams,
    pub effects: EffectParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub key: usize,
    pub path: PathBuf,
    pub skipped_sfx: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub output: PathBuf,
    /// Segment keys in concatenation order.
    pub segment_keys: Vec<usize>,
    pub ambient_cues: Vec<String>,
    pub skipped_sfx: Vec<String>,
}

/// Joins processed segments end to end into the final track.
pub struct Concatenator {
    engine: Arc<dyn MediaEngine>,
}

impl Concatenator {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    pub async fn concat(&self, ordered: &[PathBuf], output: &Path) -> PipelineResult<PathBuf> {
        if ordered.is_empty() {
            return Err(PipelineError::Concatenation("no segments to join".to_string()));
        }
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let job = MediaJob {
            inputs: ordered.iter().cloned().map(MediaInput::File).collect(),
            graph: FilterGraph::Concat,
            output: output.to_path_buf(),
        };
        self.engine
            .run(&job)
            .await
            .map_err(|e| PipelineError::Concatenation(format!("{:#}", e)))?;
        Ok(output.to_path_buf())
    }
}

pub struct StoryPipeline {
    config: Config,
    cues: CueExtractor,
    tts: Arc<dyn TtsClient>,
    engine: Arc<dyn MediaEngine>,
    sfx_lookup: Arc<dyn SfxLookup>,
    show_progress: bool,
}

impl StoryPipeline {
    pub fn new(
        config: Config,
        tts: Arc<dyn TtsClient>,
        engine: Arc<dyn MediaEngine>,
        sfx_lookup: Arc<dyn SfxLookup>,
    ) -> Self {
        Self {
            config,
            cues: CueExtractor::default(),
            tts,
            engine,
            sfx_lookup,
            show_progress: false,
        }
    }

    pub fn from_config(config: Config) -> PipelineResult<Self> {
        let tts = create_tts_client(&config)?;
        let engine: Arc<dyn MediaEngine> =
            Arc::new(FfmpegEngine::new(&config.media));
        let sfx_lookup: Arc<dyn SfxLookup> = Arc::new(
            FreesoundClient::new(&config.sfx)
                .map_err(|e| PipelineError::Configuration(format!("sound effects: {:#}", e)))?,
        );
        Ok(Self::new(config, tts, engine, sfx_lookup))
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Partitions the story and derives cues: one merged narrator plan first
    /// (if any narrator lines exist), then one plan per character line.
    pub fn plan(&self, story: &Story) -> Vec<SegmentPlan> {
        let partition = Partition::from_lines(story.classify());
        let effects = &self.config.effects;
        let mut plans = Vec::with_capacity(partition.characters.len() + 1);

        if let Some(key) = partition.narrator.iter().map(|l| l.index).min() {
            let text = partition
                .narrator
                .iter()
                .map(|l| self.speech_text(&l.text))
                .collect::<Vec<_>>()
                .join(" ");
            let rate = jittered_rate(effects.narrator_pan_hz, effects.pan_jitter_hz);
            plans.push(self.plan_segment(key, Role::Narrator, text, rate));
        }

        for (index, line) in partition.characters {
            let text = self.speech_text(&line.text).to_string();
            plans.push(self.plan_segment(index, line.role, text, effects.character_pan_hz));
        }
        plans
    }

    fn plan_segment(&self, key: usize, role: Role, text: String, pan_hz: f64) -> SegmentPlan {
        let spatial = self.cues.extract_spatial(&text, role);
        let distant = self.cues.has_distance_cue(&text);
        SegmentPlan {
            key,
            role,
            emotion: self.cues.extract_emotion(&text),
            effects: EffectParams::new(&spatial, distant, pan_hz),
            text,
        }
    }

    fn speech_text<'a>(&self, line: &'a str) -> &'a str {
        if self.config.effects.strip_role_labels {
            strip_role_label(line)
        } else {
            line
        }
    }

    /// Turns `story_text` into one mixed track at `output`.
    ///
    /// The run workspace is removed afterwards whether or not the run
    /// succeeded.
    pub async fn run(&self, story_text: &str, output: &Path) -> PipelineResult<RunReport> {
        let story = Story::parse(story_text);
        if story.is_empty() {
            return Err(PipelineError::EmptyStory);
        }

        let workspace = RunWorkspace::create_in(&self.config.build_folder)?;
        debug!("Run workspace: {:?}", workspace.path());
        let result = self.run_in(&story, output, &workspace).await;
        workspace.close();
        result
    }

    async fn run_in(
        &self,
        story: &Story,
        output: &Path,
        workspace: &RunWorkspace,
    ) -> PipelineResult<RunReport> {
        let ambient_cues = self.cues.extract_ambient(&story.full_text());
        if !ambient_cues.is_empty() {
            info!("Ambient cues detected: {}", ambient_cues.join(", "));
        }

        let resolver = Arc::new(SfxResolver::new(
            self.sfx_lookup.clone(),
            self.cues.clone(),
            workspace.sfx_dir(),
        ));
        let synthesizer = Synthesizer::new(
            self.tts.clone(),
            self.engine.clone(),
            self.config.tts.max_chunk_chars,
            self.config.effects.pad_seconds,
        );
        let effect_chain = EffectChain::new(self.engine.clone(), resolver);

        let mut state = SequencerState::Collecting;
        let plans = self.plan(story);
        info!("Planned {} segment(s) from {} line(s)", plans.len(), story.lines.len());

        let pb = if self.show_progress {
            let pb = ProgressBar::new(plans.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let render = |plan: &SegmentPlan| {
            let synthesizer = &synthesizer;
            let effect_chain = &effect_chain;
            let pb = pb.clone();
            let plan = plan.clone();
            async move {
                let voice_id = plan.role.voice_id(&self.config.tts.voices);
                let take = synthesizer
                    .synthesize(&plan.text, voice_id, plan.emotion, workspace)
                    .await?;
                let processed = effect_chain.apply(&take, &plan.effects, workspace).await?;
                pb.inc(1);
                debug!("Segment {} ({:?}) rendered", plan.key, plan.role);
                Ok::<_, PipelineError>(Segment {
                    key: plan.key,
                    path: processed.path,
                    skipped_sfx: processed.skipped_sfx,
                })
            }
        };

        let (narrator_plans, character_plans): (Vec<_>, Vec<_>) =
            plans.iter().partition(|p| p.role.is_narrator());

        let mut segments = Vec::with_capacity(plans.len());
        for plan in narrator_plans {
            segments.push(render(plan).await?);
        }
        state = self.advance(state, SequencerState::NarratorSynthesized);

        // The first failure drops every in-flight and pending line.
        let rendered: Vec<Segment> = futures_util::stream::iter(character_plans)
            .map(|plan| render(plan))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await?;
        segments.extend(rendered);
        state = self.advance(state, SequencerState::CharactersSynthesized);
        pb.finish_and_clear();

        segments.sort_by_key(|s| s.key);
        state = self.advance(state, SequencerState::Ordered);

        let ordered: Vec<PathBuf> = segments.iter().map(|s| s.path.clone()).collect();
        let output = Concatenator::new(self.engine.clone())
            .concat(&ordered, output)
            .await?;
        self.advance(state, SequencerState::Concatenated);

        let mut skipped_sfx: Vec<String> = Vec::new();
        for cue in segments.iter().flat_map(|s| s.skipped_sfx.iter()) {
            if !skipped_sfx.contains(cue) {
                skipped_sfx.push(cue.clone());
            }
        }

        info!("Story rendered to {:?}", output);
        Ok(RunReport {
            output,
            segment_keys: segments.iter().map(|s| s.key).collect(),
            ambient_cues,
            skipped_sfx,
        })
    }

    fn advance(&self, from: SequencerState, to: SequencerState) -> SequencerState {
        debug!("Sequencer {:?} -> {:?}", from, to);
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::effects::PanMode;
    use crate::services::sfx::tests::FakeLookup;
    use crate::services::tts::tests::MockTtsClient;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    /// Writes every output as the concatenation of its inputs, with `|` for
    /// generated silence, so the final file spells out the render order.
    #[derive(Default)]
    struct FileEngine {
        fail_output: Option<PathBuf>,
        jobs: Mutex<Vec<MediaJob>>,
    }

    #[async_trait]
    impl MediaEngine for FileEngine {
        async fn run(&self, job: &MediaJob) -> Result<()> {
            self.jobs.lock().unwrap().push(job.clone());
            if self.fail_output.as_ref() == Some(&job.output) {
                return Err(anyhow::anyhow!("exit status 1"));
            }
            let inputs: &[MediaInput] = match &job.graph {
                FilterGraph::Concat => &job.inputs[..],
                _ => &job.inputs[..1],
            };
            let mut content = Vec::new();
            for input in inputs {
                match input {
                    MediaInput::File(path) => content.extend(tokio::fs::read(path).await?),
                    MediaInput::Silence { .. } => content.push(b'|'),
                }
            }
            tokio::fs::write(&job.output, content).await?;
            Ok(())
        }
    }

    fn test_config(build: &Path) -> Config {
        let mut config = Config::default();
        config.build_folder = build.to_string_lossy().to_string();
        config
    }

    fn pipeline(
        config: Config,
        tts: Arc<MockTtsClient>,
        engine: Arc<FileEngine>,
        lookup: Arc<FakeLookup>,
    ) -> StoryPipeline {
        StoryPipeline::new(config, tts, engine, lookup)
    }

    const STORY: &str = "Narrator: Once upon a time.\n\
                         Male Character: Help!\n\
                         \n\
                         Narrator: The end\n\
                         Female Character: Who is there?\n";

    #[test]
    fn test_partition_groups_narrator_lines() {
        let partition = Partition::from_lines(Story::parse(STORY).classify());
        let narrator: Vec<_> = partition.narrator.iter().map(|l| l.index).collect();
        assert_eq!(narrator, vec![0, 2]);
        let characters: Vec<_> = partition.characters.keys().copied().collect();
        assert_eq!(characters, vec![1, 3]);
    }

    #[test]
    fn test_plan_merges_narrator_block() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );
        let plans = p.plan(&Story::parse(STORY));

        let keys: Vec<_> = plans.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![0, 1, 3]);
        assert_eq!(plans[0].text, "Once upon a time. The end");
        assert_eq!(plans[0].role, Role::Narrator);
        assert_eq!(plans[1].text, "Help!");
        assert_eq!(plans[2].role, Role::FemaleCharacter);
    }

    #[test]
    fn test_two_line_scenario_plans() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );
        let plans = p.plan(&Story::parse(
            "Narrator: Once upon a time.\nMale Character: Help!",
        ));

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].emotion, EmotionParams::NEUTRAL);
        assert!(matches!(plans[0].effects.pan, PanMode::Oscillating { hz } if (0.14..=0.22).contains(&hz)));
        assert_eq!(plans[1].emotion, EmotionParams::LOUD);
        assert!(matches!(plans[1].effects.pan, PanMode::Static { position } if position < 0.0));
    }

    #[test]
    fn test_directional_character_line_is_constant() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );
        let plans = p.plan(&Story::parse(
            "The hall was quiet.\nFemale Character: Look to the left.\nMale Character: No, right!",
        ));
        assert!(matches!(plans[0].effects.pan, PanMode::Oscillating { .. }));
        assert_eq!(plans[1].effects.pan, PanMode::Static { position: -1.0 });
        assert_eq!(plans[2].effects.pan, PanMode::Static { position: 1.0 });
    }

    #[tokio::test]
    async fn test_run_concatenates_in_key_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(&dir.path().join("build"));
        config.concurrency = 4;
        let tts = Arc::new(MockTtsClient::default());
        let engine = Arc::new(FileEngine::default());
        let p = pipeline(config, tts.clone(), engine.clone(), Arc::new(FakeLookup::new(false)));

        let output = dir.path().join("out").join("story.mp3");
        let report = p.run(STORY, &output).await?;

        assert_eq!(report.segment_keys, vec![0, 1, 3]);
        assert_eq!(report.output, output);
        assert_eq!(
            std::fs::read_to_string(&output)?,
            "Once upon a time. The end.|Help!|Who is there?|"
        );

        let voices: Vec<String> = tts
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.voice_id.clone())
            .collect();
        assert_eq!(voices[0], "af_nicole");
        assert!(voices.contains(&"am_michael".to_string()));
        assert!(voices.contains(&"af_bella".to_string()));

        let leftover = std::fs::read_dir(dir.path().join("build"))?.count();
        assert_eq!(leftover, 0, "run workspace should be removed");
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_sfx_is_fetched_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lookup = Arc::new(FakeLookup::new(true));
        let engine = Arc::new(FileEngine::default());
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            engine.clone(),
            lookup.clone(),
        );

        let story = "Male Character: The rain is cold.\nFemale Character: More rain!";
        let report = p.run(story, &dir.path().join("rain.mp3")).await?;

        assert_eq!(report.segment_keys, vec![0, 1]);
        assert_eq!(report.ambient_cues, vec!["rain"]);
        assert!(report.skipped_sfx.is_empty());
        assert_eq!(lookup.fetches.load(Ordering::SeqCst), 1);

        let mixes = engine
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| matches!(j.graph, FilterGraph::Mix { .. }))
            .count();
        assert_eq!(mixes, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfigured_sfx_reports_skip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );
        let report = p
            .run("A storm rolled in.\nStorm again.", &dir.path().join("s.mp3"))
            .await?;
        assert_eq!(report.skipped_sfx, vec!["storm"]);
        assert!(dir.path().join("s.mp3").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_synthesis_failure_aborts_and_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let build = dir.path().join("build");
        let tts = Arc::new(MockTtsClient {
            should_fail: true,
            ..Default::default()
        });
        let p = pipeline(
            test_config(&build),
            tts,
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );

        let output = dir.path().join("never.mp3");
        let result = p.run(STORY, &output).await;
        assert!(matches!(result, Err(PipelineError::Synthesis(_))));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(&build)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_character_failure_stops_remaining_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let build = dir.path().join("build");
        let tts = Arc::new(MockTtsClient {
            fail_on: Some("Boom".to_string()),
            ..Default::default()
        });
        let engine = Arc::new(FileEngine::default());
        let p = pipeline(
            test_config(&build),
            tts.clone(),
            engine.clone(),
            Arc::new(FakeLookup::new(false)),
        );

        let story = "Male Character: Boom.\n\
                     Female Character: two.\n\
                     Male Character: three.\n\
                     Female Character: four.\n";
        let output = dir.path().join("never.mp3");
        let result = p.run(story, &output).await;

        assert!(matches!(result, Err(PipelineError::Synthesis(_))));
        let texts: Vec<String> = tts
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect();
        assert_eq!(texts, vec!["Boom."]);
        assert!(engine.jobs.lock().unwrap().is_empty());
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(&build)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_concat_failure_is_concatenation_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("final.mp3");
        let engine = Arc::new(FileEngine {
            fail_output: Some(output.clone()),
            ..Default::default()
        });
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            engine,
            Arc::new(FakeLookup::new(false)),
        );
        let result = p.run(STORY, &output).await;
        assert!(matches!(result, Err(PipelineError::Concatenation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_story_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            test_config(dir.path()),
            Arc::new(MockTtsClient::default()),
            Arc::new(FileEngine::default()),
            Arc::new(FakeLookup::new(false)),
        );
        let result = p.run(" \n\n ", &dir.path().join("x.mp3")).await;
        assert!(matches!(result, Err(PipelineError::EmptyStory)));
    }

    #[tokio::test]
    async fn test_silence_segments_concatenate_sequentially() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = Arc::new(FileEngine::default());
        let mut inputs = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("silence_{}.mp3", i));
            engine
                .run(&MediaJob {
                    inputs: vec![MediaInput::Silence { seconds: 0.3 }],
                    graph: FilterGraph::Concat,
                    output: path.clone(),
                })
                .await?;
            inputs.push(path);
        }

        let output = dir.path().join("joined.mp3");
        Concatenator::new(engine.clone()).concat(&inputs, &output).await?;
        assert_eq!(std::fs::read_to_string(&output)?, "|||");

        let jobs = engine.jobs.lock().unwrap();
        let last = jobs.last().unwrap();
        assert_eq!(last.graph, FilterGraph::Concat);
        assert_eq!(last.inputs.len(), 3);
        Ok(())
    }
}
