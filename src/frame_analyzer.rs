use crate::video_processor::{DecodedFrame, FrameVisitor, Want};
use anyhow::Result;
use image::{GrayImage, imageops};
use log::info;
use std::time::Instant;

// Frames are compared at this size. Small enough to keep long scans cheap,
// large enough that a cut still moves the mean.
const COMPARISON_SIZE: (u32, u32) = (160, 90);

/// Mean absolute luma difference (0-255) above which a frame starts a new scene.
pub const DEFAULT_SCENE_THRESHOLD: f64 = 30.0;

/// Holds the final results of a scene scan.
pub struct SceneScan {
    pub boundaries: Vec<DecodedFrame>,
    pub frames_scanned: u64,
}

/// A stateful detector that processes frames one at a time, keeping only
/// the frames that begin a new scene.
pub struct SceneDetector {
    threshold: f64,
    max_boundaries: usize,
    start_time: Instant,
    frames_scanned: u64,
    last_luma: Option<GrayImage>,
    boundaries: Vec<DecodedFrame>,
}

impl SceneDetector {
    pub fn new(threshold: f64, max_boundaries: usize) -> Self {
        SceneDetector {
            threshold,
            max_boundaries,
            start_time: Instant::now(),
            frames_scanned: 0,
            last_luma: None,
            boundaries: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.boundaries.len() >= self.max_boundaries
    }

    /// Processes a single frame, comparing it to the previous one. Returns
    /// whether the frame was kept as a boundary.
    pub fn process_frame(&mut self, frame: DecodedFrame) -> bool {
        let luma = comparison_luma(&frame);
        self.frames_scanned += 1;

        let is_boundary = match &self.last_luma {
            None => true,
            Some(prev) => {
                mean_absolute_difference(prev, &luma) > self.threshold
            }
        };
        self.last_luma = Some(luma);

        if is_boundary && !self.is_full() {
            self.boundaries.push(frame);
            return true;
        }
        false
    }

    /// Finalizes the scan and returns the collected boundaries.
    pub fn finish(self) -> SceneScan {
        info!(
            "Scene scan complete in {:.2?}. Scanned {} frames, found {} boundaries.",
            self.start_time.elapsed(),
            self.frames_scanned,
            self.boundaries.len()
        );
        SceneScan {
            boundaries: self.boundaries,
            frames_scanned: self.frames_scanned,
        }
    }
}

impl FrameVisitor for SceneDetector {
    fn wants(&mut self, _index: u64, _timestamp: f64) -> Want {
        if self.is_full() { Want::Stop } else { Want::Take }
    }

    fn visit(&mut self, frame: DecodedFrame) -> Result<()> {
        self.process_frame(frame);
        Ok(())
    }
}

fn comparison_luma(frame: &DecodedFrame) -> GrayImage {
    let gray = imageops::grayscale(&frame.image);
    if gray.width() > COMPARISON_SIZE.0 || gray.height() > COMPARISON_SIZE.1 {
        imageops::thumbnail(&gray, COMPARISON_SIZE.0, COMPARISON_SIZE.1)
    } else {
        gray
    }
}

/// Mean absolute per-pixel difference between two equally sized luma images.
pub fn mean_absolute_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    let pixels = a.as_raw().len().min(b.as_raw().len());
    if pixels == 0 {
        return 0.0;
    }
    total as f64 / pixels as f64
}
