//! Error Types
//!
//! Typed failures for each stage of an analysis. Library boundaries return
//! these; the command-line front end wraps them in `anyhow`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while turning a video into frames.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The source cannot be decoded at all, reports no usable duration or
    /// frame rate, or produced no frames. Retrying with the same file won't help.
    #[error("invalid video: {0}")]
    InvalidVideo(String),
    /// The decoder failed part way through a sampling pass.
    #[error("frame extraction failed: {0}")]
    Extraction(String),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download timed out: {0}")]
    Timeout(String),
    #[error("remote video unavailable: {0}")]
    Unavailable(String),
    #[error("failed to store downloaded video: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SummarizerError {
    /// The model endpoint itself refused the request for quota reasons.
    #[error("summarizer rate limited: {0}")]
    RateLimited(String),
    #[error("summarizer request timed out")]
    Timeout,
    #[error("summarizer request failed: {0}")]
    Http(String),
    #[error("summarizer returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("summarizer returned no analysis text")]
    EmptyResponse,
    #[error("no frames to summarize")]
    NoFrames,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors that escape [`crate::orchestrator::Analyzer::analyze`]. Everything
/// else is reported inside the returned result.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("too many analysis requests; retry shortly")]
    RateLimited,
    #[error("could not derive cache key: {0}")]
    CacheKey(#[source] std::io::Error),
}

impl AnalyzeError {
    /// Admission rejections clear as soon as the bucket refills.
    pub fn advice(&self) -> RetryAdvice {
        match self {
            AnalyzeError::RateLimited => RetryAdvice::RetryNow,
            AnalyzeError::CacheKey(_) => RetryAdvice::FixInput,
        }
    }
}

/// Category of a result-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidVideo,
    InputTooLarge,
    Extraction,
    Download,
    Summarizer,
    SummarizerRateLimited,
    Timeout,
}

/// What a caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAdvice {
    RetryNow,
    RetryLater,
    FixInput,
}

impl FailureKind {
    pub fn advice(self) -> RetryAdvice {
        match self {
            FailureKind::InvalidVideo | FailureKind::InputTooLarge => RetryAdvice::FixInput,
            FailureKind::Extraction
            | FailureKind::SummarizerRateLimited
            | FailureKind::Download
            | FailureKind::Summarizer
            | FailureKind::Timeout => RetryAdvice::RetryLater,
        }
    }
}

/// Error indicator carried by an [`crate::orchestrator::AnalysisResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub advice: RetryAdvice,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            advice: kind.advice(),
            message: message.into(),
        }
    }
}

impl From<&SamplerError> for Failure {
    fn from(err: &SamplerError) -> Self {
        let kind = match err {
            SamplerError::InvalidVideo(_) => FailureKind::InvalidVideo,
            SamplerError::Extraction(_) => FailureKind::Extraction,
        };
        Failure::new(kind, err.to_string())
    }
}

impl From<&DownloadError> for Failure {
    fn from(err: &DownloadError) -> Self {
        let kind = match err {
            DownloadError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Download,
        };
        Failure::new(
            kind,
            format!("{err}. Try uploading the video file directly instead."),
        )
    }
}

impl From<&SummarizerError> for Failure {
    fn from(err: &SummarizerError) -> Self {
        let kind = match err {
            SummarizerError::RateLimited(_) => FailureKind::SummarizerRateLimited,
            SummarizerError::Timeout => FailureKind::Timeout,
            _ => FailureKind::Summarizer,
        };
        Failure::new(kind, err.to_string())
    }
}
