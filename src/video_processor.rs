//! Video Processing Module
//!
//! Probes and decodes video files using the ffmpeg-next crate. Decoding is
//! exposed through the [`FrameSource`] trait so sampling strategies can be
//! driven by any frame producer.

use anyhow::{Context, Result, anyhow};
use ffmpeg::format::{Pixel, input};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Container-level facts about a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Estimated from metadata; may be approximate for VFR sources.
    pub frame_count: u64,
}

/// A decoded frame in RGB form with its position in the stream.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub index: u64,
    pub timestamp: f64,
    pub image: RgbImage,
}

/// A visitor's decision about the next frame in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Skip the frame without converting it.
    Skip,
    /// Convert the frame and hand it to [`FrameVisitor::visit`].
    Take,
    /// Stop decoding.
    Stop,
}

/// Receives frames from a [`FrameSource`] in decode order.
pub trait FrameVisitor {
    fn wants(&mut self, index: u64, timestamp: f64) -> Want;
    fn visit(&mut self, frame: DecodedFrame) -> Result<()>;
}

/// Anything that can describe itself and stream its frames in order.
pub trait FrameSource {
    fn probe(&self) -> Result<VideoInfo>;
    fn stream_frames(&self, visitor: &mut dyn FrameVisitor) -> Result<()>;
}

/// Opens a local video file as a [`FrameSource`].
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Box<dyn FrameSource>;
}

pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Box<dyn FrameSource> {
        Box::new(FfmpegVideo::new(path))
    }
}

/// A video file on disk decoded with FFmpeg.
pub struct FfmpegVideo {
    path: PathBuf,
}

impl FfmpegVideo {
    pub fn new(path: &Path) -> Self {
        FfmpegVideo {
            path: path.to_path_buf(),
        }
    }
}

impl FrameSource for FfmpegVideo {
    fn probe(&self) -> Result<VideoInfo> {
        probe(&self.path)
    }

    fn stream_frames(&self, visitor: &mut dyn FrameVisitor) -> Result<()> {
        let fps = probe(&self.path)?.fps;
        process_frames_stream(&self.path, fps, visitor)
    }
}

/// Reads duration, frame rate and dimensions from container metadata without
/// decoding any frames.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    ffmpeg::init().context("Failed to initialize FFmpeg")?;
    let ictx = input(path).context("Failed to open input file for probing")?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow!("Could not find video stream in file"))?;

    let mut frame_rate = stream.avg_frame_rate();
    if frame_rate.0 <= 0 || frame_rate.1 <= 0 {
        frame_rate = stream.rate();
    }
    let fps = if frame_rate.0 > 0 && frame_rate.1 > 0 {
        frame_rate.0 as f64 / frame_rate.1 as f64
    } else {
        0.0
    };

    // Container duration is in AV_TIME_BASE units (microseconds).
    let mut duration_secs = if ictx.duration() > 0 {
        ictx.duration() as f64 / 1_000_000.0
    } else {
        0.0
    };
    if duration_secs <= 0.0 && stream.duration() > 0 {
        duration_secs = stream.duration() as f64 * f64::from(stream.time_base());
    }

    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("Failed to create decoder context")?
        .decoder()
        .video()
        .context("Failed to create video decoder")?;

    let frame_count = if stream.frames() > 0 {
        stream.frames() as u64
    } else {
        (duration_secs * fps).round().max(0.0) as u64
    };

    let info = VideoInfo {
        duration_secs,
        fps,
        width: decoder.width(),
        height: decoder.height(),
        frame_count,
    };
    debug!("Probed {:?}: {:?}", path, info);
    Ok(info)
}

/// Decodes the video one frame at a time, converting only the frames the
/// visitor asks for. Memory use stays constant regardless of video length.
pub fn process_frames_stream(path: &Path, fps: f64, visitor: &mut dyn FrameVisitor) -> Result<()> {
    if fps <= 0.0 {
        return Err(anyhow!("Cannot stream frames without a frame rate"));
    }
    ffmpeg::init().context("Failed to initialize FFmpeg")?;

    let mut ictx = input(path).context("Failed to open input file")?;
    let input = ictx
        .streams()
        .best(Type::Video)
        .context("Could not find video stream")?;
    let video_stream_index = input.index();

    let context_decoder = ffmpeg::codec::context::Context::from_parameters(input.parameters())
        .context("Failed to create decoder context")?;
    let mut decoder = context_decoder
        .decoder()
        .video()
        .context("Failed to create video decoder")?;

    let mut scaler = ScalingContext::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        Flags::BILINEAR,
    )
    .context("Failed to create scaler")?;

    let mut index: u64 = 0;
    let mut stopped = false;
    let mut receive_decoded_frames = |decoder: &mut ffmpeg::decoder::Video| -> Result<bool> {
        let mut decoded = Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let timestamp = index as f64 / fps;
            match visitor.wants(index, timestamp) {
                Want::Stop => return Ok(true),
                Want::Skip => {}
                Want::Take => {
                    let mut rgb_frame = Video::empty();
                    scaler.run(&decoded, &mut rgb_frame).context("Scaler failed")?;
                    let image = frame_to_rgb(&rgb_frame)?;
                    visitor.visit(DecodedFrame {
                        index,
                        timestamp,
                        image,
                    })?;
                }
            }
            index += 1;
        }
        Ok(false)
    };

    for (stream, packet) in ictx.packets() {
        if stream.index() == video_stream_index {
            decoder
                .send_packet(&packet)
                .context("Failed to send packet to decoder")?;
            if receive_decoded_frames(&mut decoder)? {
                stopped = true;
                break;
            }
        }
    }
    if !stopped {
        decoder.send_eof()?;
        receive_decoded_frames(&mut decoder)?;
    }

    info!("Finished streaming {} frames from {:?}.", index, path);
    Ok(())
}

/// Copies an RGB24 frame into a tightly packed image buffer, dropping row padding.
fn frame_to_rgb(rgb_frame: &Video) -> Result<RgbImage> {
    let frame_data = rgb_frame.data(0);
    let width = rgb_frame.width() as usize;
    let height = rgb_frame.height() as usize;
    let stride = rgb_frame.stride(0);

    if stride == 0 {
        return Err(anyhow!("Invalid frame stride"));
    }

    let mut packed = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let start_index = y * stride;
        let end_index = start_index + (width * 3);
        if end_index > frame_data.len() {
            return Err(anyhow!("Frame data is smaller than expected"));
        }
        packed.extend_from_slice(&frame_data[start_index..end_index]);
    }

    RgbImage::from_vec(width as u32, height as u32, packed)
        .context("Failed to create image buffer from frame data")
}
