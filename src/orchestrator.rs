//! Analysis Orchestrator
//!
//! Drives one analysis end to end: cache lookup, admission, materializing
//! the video locally, frame sampling, style resolution and the summarizer
//! call. Everything that can fail after admission is reported inside the
//! returned [`AnalysisResult`]; only rate limiting and key derivation
//! failures escape as errors.

use crate::cache::{CacheKey, ResultCache};
use crate::downloader::{Downloader, LocalVideo};
use crate::error::{AnalyzeError, CacheError, Failure, FailureKind};
use crate::rate_limiter::RateLimiter;
use crate::sampler::{FrameSampler, SamplerConfig, SamplingStrategy};
use crate::styles;
use crate::summarizer::Summarizer;
use crate::video_processor::{FfmpegOpener, VideoOpener};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Longest analysis text kept in a result, in characters.
pub const MAX_ANALYSIS_CHARS: usize = 20_000;
const TRUNCATION_MARKER: &str = "\n\n[analysis truncated]";

pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 512 * 1024 * 1024;

/// Where the video to analyze comes from.
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// Uploaded bytes with the name they were uploaded under.
    Bytes { name: String, data: Vec<u8> },
    /// A file already on local disk.
    File(PathBuf),
    /// A remote video fetched through the [`Downloader`].
    Url(String),
}

impl VideoSource {
    /// Human-readable identifier recorded in the result.
    pub fn label(&self) -> String {
        match self {
            VideoSource::Bytes { name, .. } => name.clone(),
            VideoSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            VideoSource::Url(url) => url.clone(),
        }
    }

    pub fn cache_key(
        &self,
        style_id: &str,
        custom_instructions: &str,
    ) -> std::io::Result<CacheKey> {
        match self {
            VideoSource::Bytes { data, .. } => {
                Ok(CacheKey::for_bytes(data, style_id, custom_instructions))
            }
            VideoSource::File(path) => CacheKey::for_file(path, style_id, custom_instructions),
            VideoSource::Url(url) => Ok(CacheKey::for_url(url, style_id, custom_instructions)),
        }
    }
}

/// The stored outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub cache_key: String,
    pub source: String,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    pub frames_extracted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SamplingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl AnalysisResult {
    fn pending(key: &CacheKey, source: &VideoSource, style: &str, custom: Option<&str>) -> Self {
        AnalysisResult {
            cache_key: key.to_string(),
            source: source.label(),
            style: style.to_string(),
            custom_instructions: custom.map(str::to_string),
            frames_extracted: 0,
            strategy: None,
            analysis: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.analysis.is_some()
    }
}

/// Long-lived analysis service. Share it behind an `Arc`; every method takes
/// `&self` and independent analyses may run concurrently.
pub struct Analyzer {
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
    summarizer: Arc<dyn Summarizer>,
    downloader: Arc<dyn Downloader>,
    opener: Arc<dyn VideoOpener>,
    sampler: FrameSampler,
    max_video_bytes: u64,
}

impl Analyzer {
    pub fn new(
        cache: Arc<ResultCache>,
        limiter: Arc<RateLimiter>,
        summarizer: Arc<dyn Summarizer>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Analyzer {
            cache,
            limiter,
            summarizer,
            downloader,
            opener: Arc::new(FfmpegOpener),
            sampler: FrameSampler::new(SamplerConfig::default()),
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
        }
    }

    pub fn with_sampler(mut self, config: SamplerConfig) -> Self {
        self.sampler = FrameSampler::new(config);
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn VideoOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_max_video_bytes(mut self, max_video_bytes: u64) -> Self {
        self.max_video_bytes = max_video_bytes;
        self
    }

    /// Analyzes a video, reusing a cached result when the same video, style
    /// and instructions were analyzed before.
    pub fn analyze(
        &self,
        source: &VideoSource,
        style_id: &str,
        custom_instructions: Option<&str>,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let custom = custom_instructions
            .map(str::trim)
            .filter(|text| !text.is_empty());
        let key = source
            .cache_key(style_id, custom.unwrap_or(""))
            .map_err(AnalyzeError::CacheKey)?;

        if let Some(cached) = self.cache.get(&key) {
            info!("Returning cached analysis {} for {}.", key, cached.source);
            return Ok(cached);
        }

        if !self.limiter.try_consume(1) {
            warn!("Rejected analysis of {}: rate limit reached.", source.label());
            return Err(AnalyzeError::RateLimited);
        }

        let started = Instant::now();
        let mut result = AnalysisResult::pending(&key, source, style_id, custom);
        if let Err(failure) = self.run_pipeline(source, style_id, custom, &mut result) {
            warn!("Analysis of {} failed: {}", result.source, failure.message);
            result.error = Some(failure);
        }
        info!(
            "Analysis of {} finished in {:.2?} with {} frames.",
            result.source,
            started.elapsed(),
            result.frames_extracted
        );

        // Failed results stay out of the cache so a retry starts fresh.
        // Same-key writers race last-write-wins; identical inputs give identical keys.
        if result.is_success() {
            if let Err(e) = self.cache.put(&key, &result) {
                warn!("Failed to cache analysis {}: {}", key, e);
            }
        }
        Ok(result)
    }

    fn run_pipeline(
        &self,
        source: &VideoSource,
        style_id: &str,
        custom: Option<&str>,
        result: &mut AnalysisResult,
    ) -> Result<(), Failure> {
        // Dropping `local` removes any temporary copy, on every path out.
        let local = self.materialize(source)?;

        let frame_source = self.opener.open(local.path());
        let sampled = self
            .sampler
            .sample(frame_source.as_ref())
            .map_err(|e| Failure::from(&e))?;
        result.frames_extracted = sampled.frames.len();
        result.strategy = Some(sampled.strategy);

        let instruction = styles::resolve_instruction(style_id, custom);
        let text = self
            .summarizer
            .summarize(&sampled.frames, &instruction)
            .map_err(|e| Failure::from(&e))?;
        result.analysis = Some(bound_analysis(text));
        Ok(())
    }

    fn materialize(&self, source: &VideoSource) -> Result<LocalVideo, Failure> {
        match source {
            VideoSource::Bytes { data, .. } => {
                self.check_size(data.len() as u64)?;
                write_temp_video(data).map_err(|e| {
                    Failure::new(
                        FailureKind::Extraction,
                        format!("failed to stage uploaded video: {e}"),
                    )
                })
            }
            VideoSource::File(path) => {
                let size = std::fs::metadata(path)
                    .map_err(|e| {
                        Failure::new(
                            FailureKind::InvalidVideo,
                            format!("cannot read {}: {e}", path.display()),
                        )
                    })?
                    .len();
                self.check_size(size)?;
                Ok(LocalVideo::Existing(path.clone()))
            }
            VideoSource::Url(url) => self.downloader.fetch(url).map_err(|e| Failure::from(&e)),
        }
    }

    fn check_size(&self, size: u64) -> Result<(), Failure> {
        if size == 0 {
            return Err(Failure::new(FailureKind::InvalidVideo, "video is empty"));
        }
        if size > self.max_video_bytes {
            return Err(Failure::new(
                FailureKind::InputTooLarge,
                format!(
                    "video is {size} bytes; the limit is {} bytes",
                    self.max_video_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn get_cached(&self, key: &CacheKey) -> Option<AnalysisResult> {
        self.cache.get(key)
    }

    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.cache.clear()
    }

    pub fn list_styles(&self) -> BTreeMap<&'static str, &'static str> {
        styles::list_styles()
    }
}

fn write_temp_video(data: &[u8]) -> std::io::Result<LocalVideo> {
    let mut file = tempfile::Builder::new()
        .prefix("vidsummary-")
        .suffix(".mp4")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(LocalVideo::Temporary(file.into_temp_path()))
}

/// Caps analysis text at [`MAX_ANALYSIS_CHARS`] characters.
pub fn bound_analysis(text: String) -> String {
    match text.char_indices().nth(MAX_ANALYSIS_CHARS) {
        None => text,
        Some((cut, _)) => {
            let mut bounded = text[..cut].to_string();
            bounded.push_str(TRUNCATION_MARKER);
            bounded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_analysis_leaves_short_text_alone() {
        assert_eq!(bound_analysis("short".into()), "short");
    }

    #[test]
    fn test_bound_analysis_cuts_on_char_boundary() {
        let text = "é".repeat(MAX_ANALYSIS_CHARS + 10);
        let bounded = bound_analysis(text);
        assert!(bounded.ends_with(TRUNCATION_MARKER));
        let kept = bounded.trim_end_matches(TRUNCATION_MARKER);
        assert_eq!(kept.chars().count(), MAX_ANALYSIS_CHARS);
    }

    #[test]
    fn test_source_labels() {
        let bytes = VideoSource::Bytes {
            name: "clip.mp4".into(),
            data: vec![1],
        };
        assert_eq!(bytes.label(), "clip.mp4");
        assert_eq!(VideoSource::File(PathBuf::from("/tmp/a/b.mov")).label(), "b.mov");
        assert_eq!(
            VideoSource::Url("https://example.com/v.mp4".into()).label(),
            "https://example.com/v.mp4"
        );
    }

    #[test]
    fn test_staged_upload_is_removed_on_drop() {
        let staged = write_temp_video(b"abc").unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        drop(staged);
        assert!(!path.exists());
    }
}
