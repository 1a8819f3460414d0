// Region detection: find the rectangles of an image that must be obscured
// before it leaves the machine.

use image::GrayImage;

/// Axis-aligned rectangle in pixel coordinates. Always non-empty and fully
/// inside the image it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// A region exactly as given, or `None` if it is empty or does not fit
    /// inside `image_width` x `image_height`.
    pub fn new(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let fits_x = x.checked_add(width).map_or(false, |r| r <= image_width);
        let fits_y = y.checked_add(height).map_or(false, |b| b <= image_height);
        (width > 0 && height > 0 && fits_x && fits_y).then_some(Region {
            x,
            y,
            width,
            height,
        })
    }

    /// Intersect a detector box (which may poke outside the frame) with the
    /// image. `None` when nothing of it is left.
    pub fn clamped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let left = x.max(0);
        let top = y.max(0);
        let right = x.saturating_add(width).min(image_width as i64);
        let bottom = y.saturating_add(height).min(image_height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Region {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Pluggable detection backend.
///
/// Implementations receive a row-major grayscale view of the image and
/// return the regions to blur, in any order. Zero regions is a normal answer.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Vec<Region>;
}

/// Detector that never finds anything. Used when no face model is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetector;

impl RegionDetector for NoDetector {
    fn detect(&self, _gray: &GrayImage) -> Vec<Region> {
        Vec::new()
    }
}

#[cfg(feature = "face-detection")]
pub use seeta::RustfaceDetector;

#[cfg(feature = "face-detection")]
mod seeta {
    use super::{Region, RegionDetector};
    use image::GrayImage;
    use log::debug;
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    const MIN_FACE_SIZE: u32 = 30;
    const SCORE_THRESHOLD: f64 = 2.0;
    const PYRAMID_SCALE_FACTOR: f32 = 0.8;
    const WINDOW_STEP: u32 = 4;

    /// Face detector backed by the `rustface` crate (SeetaFace engine).
    pub struct RustfaceDetector {
        model: rustface::Model,
    }

    impl RustfaceDetector {
        /// Load a SeetaFace frontal model (`seeta_fd_frontal_v1.0.bin`).
        pub fn from_file(path: &Path) -> std::io::Result<Self> {
            let file = File::open(path)?;
            let model = rustface::read_model(BufReader::new(file))?;
            Ok(RustfaceDetector { model })
        }
    }

    impl RegionDetector for RustfaceDetector {
        fn detect(&self, gray: &GrayImage) -> Vec<Region> {
            let (width, height) = gray.dimensions();
            let mut detector = rustface::create_detector_with_model(self.model.clone());
            detector.set_min_face_size(MIN_FACE_SIZE);
            detector.set_score_thresh(SCORE_THRESHOLD);
            detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
            detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

            let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
            debug!("found {} faces in {}x{} image", faces.len(), width, height);

            faces
                .iter()
                .filter_map(|face| {
                    let bbox = face.bbox();
                    Region::clamped(
                        bbox.x() as i64,
                        bbox.y() as i64,
                        bbox.width() as i64,
                        bbox.height() as i64,
                        width,
                        height,
                    )
                })
                .collect()
        }
    }
}
