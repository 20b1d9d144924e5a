//! Summarizer Module
//!
//! The vision model behind an analysis. [`Summarizer`] is the seam the
//! orchestrator talks to; [`OpenAiSummarizer`] implements it against an
//! OpenAI-compatible chat completions endpoint.

use crate::encoder::EncodedFrame;
use crate::error::SummarizerError;
use log::{debug, info};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const SYSTEM_MESSAGE: &str = "You are an AI assistant that analyzes video frames and provides insights based on the given prompt.";

/// Turns an ordered set of frames plus an instruction into analysis text.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, frames: &[EncodedFrame], instructions: &str)
    -> Result<String, SummarizerError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct OpenAiSummarizer {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: OpenAiConfig) -> Result<Self, SummarizerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SummarizerError::Http(e.to_string()))?;
        Ok(OpenAiSummarizer { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl Summarizer for OpenAiSummarizer {
    fn summarize(
        &self,
        frames: &[EncodedFrame],
        instructions: &str,
    ) -> Result<String, SummarizerError> {
        if frames.is_empty() {
            return Err(SummarizerError::NoFrames);
        }
        let body = build_request_body(&self.config.model, self.config.max_tokens, frames, instructions);
        info!(
            "Sending {} frames to {} ({}).",
            frames.len(),
            self.config.model,
            self.endpoint()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().map_err(map_transport_error)?;
        debug!("Summarizer responded with {} ({} bytes).", status, text.len());
        parse_completion(status, &text)
    }
}

fn map_transport_error(err: reqwest::Error) -> SummarizerError {
    if err.is_timeout() {
        SummarizerError::Timeout
    } else {
        SummarizerError::Http(err.to_string())
    }
}

/// Chat completions payload: one instruction followed by every frame in
/// order, each labelled with its position in the video.
pub fn build_request_body(
    model: &str,
    max_tokens: u32,
    frames: &[EncodedFrame],
    instructions: &str,
) -> Value {
    let mut content = vec![json!({
        "type": "text",
        "text": format!("Analyze the following video frames based on this instruction: {instructions}"),
    })];
    for (ordinal, frame) in frames.iter().enumerate() {
        content.push(json!({
            "type": "text",
            "text": format!("Frame {} at {}", ordinal + 1, frame.timestamp_label()),
        }));
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": frame.data_url(), "detail": "low" },
        }));
    }

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [
            { "role": "system", "content": SYSTEM_MESSAGE },
            { "role": "user", "content": content },
        ],
    })
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Extracts the analysis text, or classifies the failure.
pub fn parse_completion(status: StatusCode, body: &str) -> Result<String, SummarizerError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| body.chars().take(500).collect());
        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
            SummarizerError::RateLimited(message)
        } else {
            SummarizerError::Api {
                status: status.as_u16(),
                message,
            }
        });
    }

    let completion: Completion = serde_json::from_str(body)
        .map_err(|e| SummarizerError::Http(format!("malformed completion: {e}")))?;
    completion
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(SummarizerError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64, timestamp: f64) -> EncodedFrame {
        EncodedFrame {
            index,
            timestamp,
            width: 2,
            height: 2,
            jpeg: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn test_request_body_keeps_frame_order() {
        let frames = [frame(0, 0.0), frame(30, 15.0), frame(60, 75.0)];
        let body = build_request_body("gpt-4o", 500, &frames, "Count the people.");

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 500);
        let content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1 + 2 * frames.len());
        assert!(content[0]["text"].as_str().unwrap().ends_with("Count the people."));
        assert_eq!(content[1]["text"], "Frame 1 at 0:00");
        assert_eq!(content[3]["text"], "Frame 2 at 0:15");
        assert_eq!(content[5]["text"], "Frame 3 at 1:15");
        assert!(
            content[2]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")
        );
    }

    #[test]
    fn test_parse_successful_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  A dog runs.  "}}]}"#;
        assert_eq!(parse_completion(StatusCode::OK, body).unwrap(), "A dog runs.");
    }

    #[test]
    fn test_parse_empty_completion() {
        let body = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert!(matches!(
            parse_completion(StatusCode::OK, body),
            Err(SummarizerError::EmptyResponse)
        ));
    }

    #[test]
    fn test_parse_rate_limit_and_api_errors() {
        let body = r#"{"error":{"message":"Rate limit reached"}}"#;
        match parse_completion(StatusCode::TOO_MANY_REQUESTS, body) {
            Err(SummarizerError::RateLimited(msg)) => assert_eq!(msg, "Rate limit reached"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_completion(StatusCode::BAD_GATEWAY, "upstream down") {
            Err(SummarizerError::Api { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
