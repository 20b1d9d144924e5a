//! vidsummary - Core Library
//!
//! Samples representative frames from a video, asks a vision model to
//! analyze them in a chosen style, and caches the result so each distinct
//! request is computed at most once.

use anyhow::{Context, Result, anyhow, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod cache;
pub mod document_builder;
pub mod downloader;
pub mod encoder;
pub mod error;
pub mod frame_analyzer;
pub mod orchestrator;
pub mod rate_limiter;
pub mod sampler;
pub mod styles;
pub mod summarizer;
pub mod video_processor;

use cache::{CacheKey, ResultCache};
use document_builder::ExportFormat;
use downloader::HttpDownloader;
use orchestrator::{AnalysisResult, Analyzer, VideoSource};
use rate_limiter::RateLimiter;
use sampler::SamplerConfig;
use summarizer::{OpenAiConfig, OpenAiSummarizer};

/// Application configuration structure.
#[derive(Debug)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub max_frames: usize,
    pub scene_threshold: f64,
    pub requests_per_minute: u32,
    pub max_video_bytes: u64,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

/// What the front end asked for.
#[derive(Debug)]
pub enum Command {
    Analyze {
        input: String,
        style: String,
        custom_prompt: Option<String>,
        format: ExportFormat,
        output: Option<PathBuf>,
    },
    Styles,
    Show {
        key: String,
        format: ExportFormat,
        output: Option<PathBuf>,
    },
    ClearCache,
}

/// Executes one command against a freshly wired service.
pub fn run(config: Config, command: Command) -> Result<()> {
    info!("Initializing with config: cache={:?}, max_frames={}, rpm={}, model={}",
        config.cache_dir, config.max_frames, config.requests_per_minute, config.model);

    let cache = Arc::new(ResultCache::open(&config.cache_dir).context("Failed to open result cache")?);

    match command {
        Command::Styles => {
            for (id, instruction) in styles::list_styles() {
                println!("{id:<18} {instruction}");
            }
            Ok(())
        }
        Command::ClearCache => {
            cache.clear().context("Failed to clear result cache")?;
            println!("Cache cleared.");
            Ok(())
        }
        Command::Show { key, format, output } => {
            let key = CacheKey::parse(&key)?;
            let result = cache
                .get(&key)
                .ok_or_else(|| anyhow!("No cached result for key {key}"))?;
            emit(&result, format, output)
        }
        Command::Analyze {
            input,
            style,
            custom_prompt,
            format,
            output,
        } => {
            let analyzer = build_analyzer(&config, cache)?;
            let source = if input.starts_with("http://") || input.starts_with("https://") {
                VideoSource::Url(input)
            } else {
                VideoSource::File(PathBuf::from(input))
            };

            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} Analyzing {msg} [{elapsed_precise}]")
                    .context("Invalid progress template")?,
            );
            pb.set_message(source.label());
            pb.enable_steady_tick(Duration::from_millis(100));
            let outcome = analyzer.analyze(&source, &style, custom_prompt.as_deref());
            pb.finish_and_clear();

            let result = outcome.map_err(|e| anyhow!("{e} ({:?})", e.advice()))?;
            emit(&result, format, output)?;
            match &result.error {
                Some(failure) => bail!("{} ({:?})", failure.message, failure.advice),
                None => {
                    info!("Analysis stored under cache key {}", result.cache_key);
                    Ok(())
                }
            }
        }
    }
}

fn build_analyzer(config: &Config, cache: Arc<ResultCache>) -> Result<Analyzer> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;
    let summarizer = OpenAiSummarizer::new(OpenAiConfig {
        api_key,
        base_url: config.api_base.clone(),
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        timeout: config.request_timeout,
    })?;
    let downloader = HttpDownloader::new(config.download_timeout, config.max_video_bytes)?;

    Ok(Analyzer::new(
        cache,
        Arc::new(RateLimiter::new(config.requests_per_minute)),
        Arc::new(summarizer),
        Arc::new(downloader),
    )
    .with_sampler(SamplerConfig {
        max_frames: config.max_frames,
        scene_threshold: config.scene_threshold,
    })
    .with_max_video_bytes(config.max_video_bytes))
}

/// Writes a rendered result to `output`, or to stdout for text formats.
fn emit(result: &AnalysisResult, format: ExportFormat, output: Option<PathBuf>) -> Result<()> {
    let output = match (output, format) {
        (Some(path), _) => Some(path),
        (None, ExportFormat::Pdf) => {
            let path = PathBuf::from(format!("analysis_result.{}", format.extension()));
            warn!("PDF output needs a file; writing to {:?}", path);
            Some(path)
        }
        (None, _) => None,
    };

    match output {
        Some(path) if format == ExportFormat::Pdf => document_builder::build_pdf(result, &path)?,
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create output directory")?;
            }
            let bytes = document_builder::render(result, format)?;
            fs::write(&path, &bytes).with_context(|| format!("Failed to write {:?}", path))?;
            info!("Wrote {} output to {:?}", format.extension(), path);
        }
        None => {
            let bytes = document_builder::render(result, format)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
