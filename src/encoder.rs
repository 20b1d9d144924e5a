//! Frame Encoding Module
//!
//! Normalizes sampled frames into bounded-size JPEG payloads for the
//! summarizer.

use crate::video_processor::DecodedFrame;
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use rayon::prelude::*;
use std::io::Cursor;

/// Largest width or height of an encoded frame, in pixels.
pub const MAX_DIMENSION: u32 = 768;
pub const JPEG_QUALITY: u8 = 85;

/// A frame ready to be sent to the summarizer.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub index: u64,
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.jpeg)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.to_base64())
    }

    /// Timestamp as `m:ss`, the form used when talking about the video.
    pub fn timestamp_label(&self) -> String {
        let secs = self.timestamp.max(0.0) as u64;
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Encodes all frames in parallel. Output order matches input order.
pub fn encode_frames(frames: Vec<DecodedFrame>) -> Result<Vec<EncodedFrame>> {
    frames.into_par_iter().map(encode_frame).collect()
}

pub fn encode_frame(frame: DecodedFrame) -> Result<EncodedFrame> {
    let mut image = DynamicImage::ImageRgb8(frame.image);
    if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
        image = image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle);
    }
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .with_context(|| format!("Failed to encode frame {} as JPEG", frame.index))?;

    Ok(EncodedFrame {
        index: frame.index,
        timestamp: frame.timestamp,
        width,
        height,
        jpeg,
    })
}
