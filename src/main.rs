use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use story2audio::{Config, StoryPipeline};

const CONFIG_PATH: &str = "config.yml";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // A single story can be rendered without a config file; batch mode needs one.
    let config = match Config::load(CONFIG_PATH) {
        Ok(cfg) => cfg,
        Err(e) if !args.is_empty() => {
            warn!("{:#}; using defaults", e);
            let mut cfg = Config::default();
            cfg.apply_env_credentials();
            cfg
        }
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure '{}' exists, or pass a story file.", CONFIG_PATH);
            return Err(e);
        }
    };

    config.ensure_directories()?;
    let pipeline = StoryPipeline::from_config(config.clone())?.with_progress(true);

    if let Some(input) = args.first() {
        let input = PathBuf::from(input);
        let output = match args.get(1) {
            Some(out) => PathBuf::from(out),
            None => output_path_for(&config, &input)?,
        };
        render(&pipeline, &input, &output).await?;
        return Ok(());
    }

    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&config.input_folder).await?;
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            entries.push(path);
        }
    }
    entries.sort();

    for input in entries {
        let output = output_path_for(&config, &input)?;
        if output.exists() {
            info!("Skipping completed story: {:?}", input);
            continue;
        }
        render(&pipeline, &input, &output).await?;
    }

    info!("All stories processed!");
    Ok(())
}

async fn render(pipeline: &StoryPipeline, input: &Path, output: &Path) -> Result<()> {
    info!("Processing story: {:?}", input);
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {:?}", input))?;
    let report = pipeline
        .run(&text, output)
        .await
        .with_context(|| format!("Failed to render {:?}", input))?;

    if !report.skipped_sfx.is_empty() {
        warn!("Sound effects skipped: {}", report.skipped_sfx.join(", "));
    }
    println!(
        "Done! {} segment(s) -> {}",
        report.segment_keys.len(),
        report.output.display()
    );
    Ok(())
}

fn output_path_for(config: &Config, input: &Path) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .with_context(|| format!("Invalid story path {:?}", input))?;
    Ok(Path::new(&config.output_folder)
        .join(stem)
        .with_extension("mp3"))
}
