//! Frame Sampling Module
//!
//! Chooses which frames of a video are handed to the summarizer. The choice
//! is tiered on duration so short clips are sampled densely, medium clips at
//! a stretched interval, and long videos by scene changes with an interval
//! fallback. The result never exceeds the configured frame budget.

use crate::encoder::{self, EncodedFrame};
use crate::error::SamplerError;
use crate::frame_analyzer::{DEFAULT_SCENE_THRESHOLD, SceneDetector};
use crate::video_processor::{DecodedFrame, FrameSource, FrameVisitor, Want};
use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FRAMES: usize = 30;
/// Videos shorter than this (seconds) get one frame per second.
pub const SHORT_TIER_LIMIT: f64 = 20.0;
/// Videos at least this long (seconds) try scene detection first.
pub const LONG_TIER_START: f64 = 90.0;
const TARGET_FRAMES: f64 = 28.0;
const MIN_INTERVAL_SECS: f64 = 2.0;
/// Fewest frames a medium-tier or scene-detected sample may contain.
pub const MIN_SCENE_FRAMES: usize = 20;

// Absorbs float error when comparing frame timestamps to sample targets.
const TIME_EPSILON: f64 = 1e-6;

/// How the frames of a video were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingStrategy {
    Dense { interval_secs: f64 },
    FixedInterval { interval_secs: f64 },
    SceneBoundaries { boundaries: usize },
    SceneFallback { interval_secs: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub max_frames: usize,
    pub scene_threshold: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            max_frames: DEFAULT_MAX_FRAMES,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
        }
    }
}

/// Frames selected from one video, in extraction order.
#[derive(Debug)]
pub struct SampledVideo {
    pub frames: Vec<EncodedFrame>,
    pub strategy: SamplingStrategy,
    pub duration_secs: f64,
}

pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        FrameSampler {
            config: SamplerConfig {
                max_frames: config.max_frames.max(1),
                ..config
            },
        }
    }

    /// Samples any frame source. Fails rather than returning an empty sample.
    pub fn sample(&self, source: &dyn FrameSource) -> Result<SampledVideo, SamplerError> {
        let info = source
            .probe()
            .map_err(|e| SamplerError::InvalidVideo(format!("{e:#}")))?;
        let duration = info.duration_secs;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(SamplerError::InvalidVideo("video has no duration".into()));
        }
        if !info.fps.is_finite() || info.fps <= 0.0 {
            return Err(SamplerError::InvalidVideo("video has no frame rate".into()));
        }
        info!(
            "Sampling {:.1}s video at {:.2} fps with a budget of {} frames.",
            duration, info.fps, self.config.max_frames
        );

        let (mut frames, strategy) = self.select_frames(source, duration)?;
        frames.sort_by_key(|f| f.index);
        let frames = downsample(frames, self.config.max_frames);
        if frames.is_empty() {
            return Err(SamplerError::InvalidVideo(
                "no frames could be extracted".into(),
            ));
        }

        let frames = encoder::encode_frames(frames)
            .map_err(|e| SamplerError::Extraction(format!("{e:#}")))?;
        info!("Selected {} frames using {:?}.", frames.len(), strategy);

        Ok(SampledVideo {
            frames,
            strategy,
            duration_secs: duration,
        })
    }

    fn select_frames(
        &self,
        source: &dyn FrameSource,
        duration: f64,
    ) -> Result<(Vec<DecodedFrame>, SamplingStrategy), SamplerError> {
        if duration < SHORT_TIER_LIMIT {
            let frames = sample_at_interval(source, 1.0, duration)?;
            return Ok((frames, SamplingStrategy::Dense { interval_secs: 1.0 }));
        }

        if duration < LONG_TIER_START {
            let interval = fixed_interval(duration);
            let frames = sample_at_interval(source, interval, duration)?;
            return Ok((frames, SamplingStrategy::FixedInterval { interval_secs: interval }));
        }

        let required = MIN_SCENE_FRAMES.min(self.config.max_frames);
        let mut detector = SceneDetector::new(self.config.scene_threshold, self.config.max_frames);
        match source.stream_frames(&mut detector) {
            Ok(()) => {
                let scan = detector.finish();
                if scan.boundaries.len() >= required {
                    let boundaries = scan.boundaries.len();
                    return Ok((scan.boundaries, SamplingStrategy::SceneBoundaries { boundaries }));
                }
                info!(
                    "Scene detection found only {} boundaries (need {}); using fixed interval.",
                    scan.boundaries.len(),
                    required
                );
            }
            Err(e) => warn!("Scene detection failed, using fixed interval: {:#}", e),
        }

        let interval = fixed_interval(duration);
        let frames = sample_at_interval(source, interval, duration)?;
        Ok((frames, SamplingStrategy::SceneFallback { interval_secs: interval }))
    }
}

/// Seconds between frames for the fixed-interval strategy. Aims for about
/// 28 frames: `max(2, floor(duration / 28))`, relaxed to `duration / 28`
/// when the 2 second floor would leave fewer than [`MIN_SCENE_FRAMES`].
pub fn fixed_interval(duration: f64) -> f64 {
    let interval = (duration / TARGET_FRAMES).floor().max(MIN_INTERVAL_SECS);
    if (duration / interval).ceil() < MIN_SCENE_FRAMES as f64 {
        duration / TARGET_FRAMES
    } else {
        interval
    }
}

/// Evenly thins `frames` down to at most `max_frames`, keeping every
/// `count / max_frames`-th frame.
///
/// The step is an integer, so when `count` is under twice `max_frames` the
/// step is 1 and only the first `max_frames` frames survive. A 83 s video
/// sampled every 2 s gives 42 frames and loses its last 24 s this way. That
/// tail loss is what the documented thinning rule produces.
pub fn downsample<T>(frames: Vec<T>, max_frames: usize) -> Vec<T> {
    if frames.len() <= max_frames || max_frames == 0 {
        return frames;
    }
    let step = (frames.len() / max_frames).max(1);
    debug!(
        "Downsampling {} frames to {} (every {}th).",
        frames.len(),
        max_frames,
        step
    );
    frames.into_iter().step_by(step).take(max_frames).collect()
}

fn sample_at_interval(
    source: &dyn FrameSource,
    interval: f64,
    duration: f64,
) -> Result<Vec<DecodedFrame>, SamplerError> {
    let mut sampler = IntervalSampler::new(interval, duration);
    source
        .stream_frames(&mut sampler)
        .map_err(|e| SamplerError::Extraction(format!("{e:#}")))?;
    Ok(sampler.frames)
}

/// Keeps the first frame at or after each multiple of `interval`.
struct IntervalSampler {
    interval: f64,
    duration: f64,
    slot: u64,
    frames: Vec<DecodedFrame>,
}

impl IntervalSampler {
    fn new(interval: f64, duration: f64) -> Self {
        IntervalSampler {
            interval,
            duration,
            slot: 0,
            frames: Vec::new(),
        }
    }

    fn target(&self) -> f64 {
        self.slot as f64 * self.interval
    }
}

impl FrameVisitor for IntervalSampler {
    fn wants(&mut self, _index: u64, timestamp: f64) -> Want {
        if self.target() >= self.duration - TIME_EPSILON {
            return Want::Stop;
        }
        if timestamp + TIME_EPSILON < self.target() {
            return Want::Skip;
        }
        // A low frame rate can put several targets before this frame.
        while self.target() <= timestamp + TIME_EPSILON {
            self.slot += 1;
        }
        Want::Take
    }

    fn visit(&mut self, frame: DecodedFrame) -> Result<()> {
        self.frames.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_processor::VideoInfo;
    use anyhow::anyhow;
    use image::{Rgb, RgbImage};
    use std::cell::Cell;

    /// An in-memory video whose frame brightness is a function of time.
    struct SyntheticVideo {
        duration: f64,
        fps: f64,
        brightness: fn(f64) -> u8,
        fail_first_pass_at: Option<u64>,
        passes: Cell<u32>,
    }

    impl SyntheticVideo {
        fn new(duration: f64, fps: f64, brightness: fn(f64) -> u8) -> Self {
            SyntheticVideo {
                duration,
                fps,
                brightness,
                fail_first_pass_at: None,
                passes: Cell::new(0),
            }
        }
    }

    impl FrameSource for SyntheticVideo {
        fn probe(&self) -> Result<VideoInfo> {
            Ok(VideoInfo {
                duration_secs: self.duration,
                fps: self.fps,
                width: 32,
                height: 18,
                frame_count: (self.duration * self.fps) as u64,
            })
        }

        fn stream_frames(&self, visitor: &mut dyn FrameVisitor) -> Result<()> {
            let pass = self.passes.get();
            self.passes.set(pass + 1);
            let total = (self.duration * self.fps).ceil() as u64;
            for index in 0..total {
                if pass == 0 && self.fail_first_pass_at == Some(index) {
                    return Err(anyhow!("corrupt packet at frame {index}"));
                }
                let timestamp = index as f64 / self.fps;
                match visitor.wants(index, timestamp) {
                    Want::Stop => break,
                    Want::Skip => continue,
                    Want::Take => {
                        let v = (self.brightness)(timestamp);
                        visitor.visit(DecodedFrame {
                            index,
                            timestamp,
                            image: RgbImage::from_pixel(32, 18, Rgb([v, v, v])),
                        })?;
                    }
                }
            }
            Ok(())
        }
    }

    struct Unreadable;

    impl FrameSource for Unreadable {
        fn probe(&self) -> Result<VideoInfo> {
            Err(anyhow!("moov atom not found"))
        }

        fn stream_frames(&self, _visitor: &mut dyn FrameVisitor) -> Result<()> {
            panic!("decoder must not be used after a failed probe");
        }
    }

    fn flat(_t: f64) -> u8 {
        128
    }

    /// Hard cut between black and white every 5 seconds.
    fn cuts_every_five_seconds(t: f64) -> u8 {
        if (t / 5.0) as u64 % 2 == 0 { 0 } else { 220 }
    }

    fn sampler() -> FrameSampler {
        FrameSampler::new(SamplerConfig::default())
    }

    #[test]
    fn test_short_videos_get_one_frame_per_second() {
        for duration in [0.5, 1.0, 7.3, 10.0, 15.5, 19.9] {
            let video = SyntheticVideo::new(duration, 30.0, flat);
            let sampled = sampler().sample(&video).unwrap();
            let n = sampled.frames.len();
            let floor = duration.floor() as usize;
            assert!(
                n == floor || n == floor + 1,
                "duration {duration}: got {n} frames"
            );
            assert!(n <= DEFAULT_MAX_FRAMES);
            assert_eq!(sampled.strategy, SamplingStrategy::Dense { interval_secs: 1.0 });
        }
    }

    #[test]
    fn test_short_tier_frames_are_one_second_apart() {
        let video = SyntheticVideo::new(5.0, 25.0, flat);
        let sampled = sampler().sample(&video).unwrap();
        let stamps: Vec<f64> = sampled.frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_medium_videos_stay_within_twenty_to_thirty_frames() {
        for duration in [20.0, 25.0, 38.0, 39.5, 40.0, 56.0, 60.0, 83.0, 89.9] {
            let video = SyntheticVideo::new(duration, 24.0, flat);
            let sampled = sampler().sample(&video).unwrap();
            let n = sampled.frames.len();
            assert!((20..=30).contains(&n), "duration {duration}: got {n} frames");
            assert!(matches!(sampled.strategy, SamplingStrategy::FixedInterval { .. }));
        }
    }

    #[test]
    fn test_tier_boundaries_belong_to_the_upper_tier() {
        let at_twenty = sampler().sample(&SyntheticVideo::new(20.0, 10.0, flat)).unwrap();
        assert!(matches!(at_twenty.strategy, SamplingStrategy::FixedInterval { .. }));

        let at_ninety = sampler().sample(&SyntheticVideo::new(90.0, 10.0, flat)).unwrap();
        assert!(matches!(at_ninety.strategy, SamplingStrategy::SceneFallback { .. }));
    }

    #[test]
    fn test_fixed_interval_formula() {
        assert_eq!(fixed_interval(60.0), 2.0);
        assert_eq!(fixed_interval(89.0), 3.0);
        assert_eq!(fixed_interval(280.0), 10.0);
        assert_eq!(fixed_interval(3600.0), 128.0);
        // The 2 second floor would give only 10 frames here.
        assert!((fixed_interval(20.0) - 20.0 / 28.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_static_video_falls_back_to_fixed_interval() {
        let video = SyntheticVideo::new(120.0, 10.0, flat);
        let sampled = sampler().sample(&video).unwrap();
        assert_eq!(sampled.strategy, SamplingStrategy::SceneFallback { interval_secs: 4.0 });
        assert_eq!(sampled.frames.len(), 30);
        assert_eq!(video.passes.get(), 2);
    }

    #[test]
    fn test_long_video_with_cuts_uses_scene_boundaries() {
        let video = SyntheticVideo::new(120.0, 10.0, cuts_every_five_seconds);
        let sampled = sampler().sample(&video).unwrap();
        assert_eq!(sampled.strategy, SamplingStrategy::SceneBoundaries { boundaries: 24 });
        assert_eq!(sampled.frames.len(), 24);
        assert_eq!(sampled.frames[0].index, 0);
        assert_eq!(sampled.frames[1].timestamp, 5.0);
        assert_eq!(video.passes.get(), 1);
    }

    #[test]
    fn test_scene_boundaries_are_capped_at_budget() {
        fn cut_every_second(t: f64) -> u8 {
            if t as u64 % 2 == 0 { 0 } else { 255 }
        }
        let video = SyntheticVideo::new(300.0, 5.0, cut_every_second);
        let sampled = sampler().sample(&video).unwrap();
        assert_eq!(sampled.frames.len(), DEFAULT_MAX_FRAMES);
        assert_eq!(sampled.strategy, SamplingStrategy::SceneBoundaries { boundaries: 30 });
    }

    #[test]
    fn test_decoder_failure_during_scan_falls_back() {
        let mut video = SyntheticVideo::new(150.0, 10.0, cuts_every_five_seconds);
        video.fail_first_pass_at = Some(300);
        let sampled = sampler().sample(&video).unwrap();
        assert!(matches!(sampled.strategy, SamplingStrategy::SceneFallback { .. }));
        assert!(!sampled.frames.is_empty());
    }

    #[test]
    fn test_frame_count_never_exceeds_budget() {
        let budget = SamplerConfig {
            max_frames: 8,
            ..SamplerConfig::default()
        };
        for duration in [3.0, 12.0, 45.0, 95.0, 400.0] {
            let video = SyntheticVideo::new(duration, 5.0, cuts_every_five_seconds);
            let sampled = FrameSampler::new(budget).sample(&video).unwrap();
            assert!(sampled.frames.len() <= 8, "duration {duration}");
            assert!(!sampled.frames.is_empty());
        }
    }

    #[test]
    fn test_frames_keep_extraction_order() {
        let video = SyntheticVideo::new(60.0, 24.0, flat);
        let sampled = sampler().sample(&video).unwrap();
        assert!(sampled.frames.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[test]
    fn test_invalid_videos_fail_before_decoding() {
        assert!(matches!(
            sampler().sample(&Unreadable),
            Err(SamplerError::InvalidVideo(_))
        ));

        let no_duration = SyntheticVideo::new(0.0, 30.0, flat);
        assert!(matches!(
            sampler().sample(&no_duration),
            Err(SamplerError::InvalidVideo(_))
        ));
        assert_eq!(no_duration.passes.get(), 0);

        let no_rate = SyntheticVideo::new(10.0, 0.0, flat);
        assert!(matches!(
            sampler().sample(&no_rate),
            Err(SamplerError::InvalidVideo(_))
        ));
    }

    #[test]
    fn test_downsample_takes_every_nth_and_truncates() {
        let frames: Vec<u32> = (0..70).collect();
        let thinned = downsample(frames, 30);
        assert_eq!(thinned.len(), 30);
        assert_eq!(&thinned[..3], &[0, 2, 4]);

        let few: Vec<u32> = (0..5).collect();
        assert_eq!(downsample(few, 30).len(), 5);
    }

    #[test]
    fn test_downsample_under_double_budget_keeps_the_head() {
        // 83 s every 2 s: timestamps 0, 2, ..., 82.
        let timestamps: Vec<u32> = (0..42).map(|i| i * 2).collect();
        let thinned = downsample(timestamps, 30);
        assert_eq!(thinned.len(), 30);
        assert_eq!(thinned.first(), Some(&0));
        assert_eq!(thinned.last(), Some(&58));
    }
}
