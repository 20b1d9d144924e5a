//! Remote video download.
//!
//! Tries an ordered list of request strategies; the first one that yields
//! a non-empty body wins. Each attempt is bounded by the client timeout.

use crate::error::DownloadError;
use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;

/// A decodable video on local disk. Temporary copies are deleted on drop.
pub enum LocalVideo {
    Existing(PathBuf),
    Temporary(TempPath),
}

impl LocalVideo {
    pub fn path(&self) -> &Path {
        match self {
            LocalVideo::Existing(path) => path,
            LocalVideo::Temporary(path) => path,
        }
    }
}

pub trait Downloader: Send + Sync {
    fn fetch(&self, url: &str) -> Result<LocalVideo, DownloadError>;
}

/// One way of asking a server for the video.
#[derive(Debug, Clone)]
pub struct DownloadStrategy {
    pub name: &'static str,
    pub headers: Vec<(&'static str, &'static str)>,
    /// Send the video URL itself as the referer.
    pub send_referer: bool,
}

impl DownloadStrategy {
    fn header_map(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if self.send_referer {
            if let Ok(referer) = HeaderValue::from_str(url) {
                headers.insert(REFERER, referer);
            }
        }
        headers
    }
}

/// Plain client first, then a browser-like request for hosts that reject bots.
pub fn default_strategies() -> Vec<DownloadStrategy> {
    vec![
        DownloadStrategy {
            name: "direct",
            headers: vec![("user-agent", "vidsummary/0.1")],
            send_referer: false,
        },
        DownloadStrategy {
            name: "browser",
            headers: vec![
                (
                    "user-agent",
                    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
                ),
                ("accept", "video/*,*/*;q=0.8"),
            ],
            send_referer: true,
        },
    ]
}

pub struct HttpDownloader {
    client: Client,
    strategies: Vec<DownloadStrategy>,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Unavailable(e.to_string()))?;
        Ok(HttpDownloader {
            client,
            strategies: default_strategies(),
            max_bytes,
        })
    }

    fn attempt(&self, url: &str, strategy: &DownloadStrategy) -> Result<LocalVideo, DownloadError> {
        let mut response = self
            .client
            .get(url)
            .headers(strategy.header_map(url))
            .send()
            .map_err(map_request_error)?;
        if !response.status().is_success() {
            return Err(DownloadError::Unavailable(format!(
                "server returned {}",
                response.status()
            )));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(DownloadError::Unavailable(format!(
                "video is larger than {} bytes",
                self.max_bytes
            )));
        }

        let mut file = tempfile::Builder::new()
            .prefix("vidsummary-")
            .suffix(".mp4")
            .tempfile()?;
        let written = io::copy(&mut (&mut response).take(self.max_bytes + 1), &mut file)
            .map_err(|e| DownloadError::Unavailable(e.to_string()))?;
        if written == 0 {
            return Err(DownloadError::Unavailable("empty response body".into()));
        }
        if written > self.max_bytes {
            return Err(DownloadError::Unavailable(format!(
                "video is larger than {} bytes",
                self.max_bytes
            )));
        }
        Ok(LocalVideo::Temporary(file.into_temp_path()))
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str) -> Result<LocalVideo, DownloadError> {
        run_strategies(&self.strategies, |strategy| self.attempt(url, strategy))
    }
}

/// Runs strategies in order, returning the first success or the last error.
pub fn run_strategies<T>(
    strategies: &[DownloadStrategy],
    mut attempt: impl FnMut(&DownloadStrategy) -> Result<T, DownloadError>,
) -> Result<T, DownloadError> {
    let mut last_error = DownloadError::Unavailable("no download strategies configured".into());
    for strategy in strategies {
        match attempt(strategy) {
            Ok(value) => {
                info!("Downloaded video using the {} strategy.", strategy.name);
                return Ok(value);
            }
            Err(e) => {
                warn!("Download strategy {} failed: {}", strategy.name, e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

fn map_request_error(err: reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout(err.to_string())
    } else {
        DownloadError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_success_short_circuits() {
        let mut tried = Vec::new();
        let result = run_strategies(&default_strategies(), |s| {
            tried.push(s.name);
            Ok::<_, DownloadError>(s.name)
        });
        assert_eq!(result.unwrap(), "direct");
        assert_eq!(tried, vec!["direct"]);
    }

    #[test]
    fn test_falls_through_to_next_strategy() {
        let mut tried = Vec::new();
        let result = run_strategies(&default_strategies(), |s| {
            tried.push(s.name);
            if s.name == "direct" {
                Err(DownloadError::Unavailable("403".into()))
            } else {
                Ok(s.name)
            }
        });
        assert_eq!(result.unwrap(), "browser");
        assert_eq!(tried, vec!["direct", "browser"]);
    }

    #[test]
    fn test_returns_last_error_when_all_fail() {
        let result: Result<(), _> = run_strategies(&default_strategies(), |s| {
            Err(DownloadError::Timeout(s.name.to_string()))
        });
        match result {
            Err(DownloadError::Timeout(name)) => assert_eq!(name, "browser"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_temporary_video_is_removed_on_drop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let video = LocalVideo::Temporary(file.into_temp_path());
        let path = video.path().to_path_buf();
        assert!(path.exists());
        drop(video);
        assert!(!path.exists());
    }
}
