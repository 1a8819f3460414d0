// Image anonymizer: Gaussian-blur detected regions in place and re-encode
// the result for transfer.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use log::debug;
use thiserror::Error;

use crate::detect::{Region, RegionDetector};

#[derive(Debug, Error)]
pub enum AnonymizeError {
    #[error("blur strength must be a positive odd number, got {0}")]
    InvalidBlurStrength(u32),

    #[error("JPEG quality must be between 1 and 100, got {0}")]
    InvalidJpegQuality(u8),

    #[error("region {region:?} lies outside the {width}x{height} image")]
    RegionOutOfBounds {
        region: Region,
        width: u32,
        height: u32,
    },

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Gaussian kernel size. Positive and odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurStrength(u32);

impl BlurStrength {
    pub fn new(value: u32) -> Result<Self, AnonymizeError> {
        if value % 2 == 1 {
            Ok(BlurStrength(value))
        } else {
            Err(AnonymizeError::InvalidBlurStrength(value))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// JPEG re-encode quality, 1..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegQuality(u8);

impl JpegQuality {
    pub fn new(value: u8) -> Result<Self, AnonymizeError> {
        if (1..=100).contains(&value) {
            Ok(JpegQuality(value))
        } else {
            Err(AnonymizeError::InvalidJpegQuality(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Separable Gaussian filter applied independently to each region.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    strength: BlurStrength,
    kernel: Vec<f32>,
}

impl GaussianBlur {
    /// Kernel of `strength` taps. A non-positive `sigma` is derived from the
    /// kernel size with the usual `0.3 * ((k - 1) / 2 - 1) + 0.8` rule.
    pub fn new(strength: BlurStrength, sigma: f32) -> Self {
        let size = strength.get() as usize;
        let radius = (size / 2) as f32;
        let sigma = if sigma > 0.0 {
            sigma
        } else {
            0.3 * (radius - 1.0) + 0.8
        };

        let mut kernel: Vec<f32> = (0..size)
            .map(|i| {
                let d = i as f32 - radius;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let sum: f32 = kernel.iter().sum();
        kernel.iter_mut().for_each(|w| *w /= sum);

        GaussianBlur { strength, kernel }
    }

    pub fn strength(&self) -> BlurStrength {
        self.strength
    }

    /// Blur one region of `image` against its own pixels. Borders reflect
    /// inside the region, so nothing outside it is read or written.
    fn apply(&self, image: &mut RgbImage, region: Region) {
        let (w, h) = (region.width as usize, region.height as usize);
        let radius = (self.kernel.len() / 2) as i64;

        let mut src = vec![0f32; w * h * 3];
        for row in 0..h {
            for col in 0..w {
                let px = image.get_pixel(region.x + col as u32, region.y + row as u32);
                let at = (row * w + col) * 3;
                for c in 0..3 {
                    src[at + c] = px.0[c] as f32;
                }
            }
        }

        let mut horizontal = vec![0f32; w * h * 3];
        for row in 0..h {
            for col in 0..w {
                let mut acc = [0f32; 3];
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sx = reflect101(col as i64 + k as i64 - radius, w);
                    let at = (row * w + sx) * 3;
                    for c in 0..3 {
                        acc[c] += weight * src[at + c];
                    }
                }
                horizontal[(row * w + col) * 3..][..3].copy_from_slice(&acc);
            }
        }

        for row in 0..h {
            for col in 0..w {
                let mut acc = [0f32; 3];
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sy = reflect101(row as i64 + k as i64 - radius, h);
                    let at = (sy * w + col) * 3;
                    for c in 0..3 {
                        acc[c] += weight * horizontal[at + c];
                    }
                }
                let px = image.get_pixel_mut(region.x + col as u32, region.y + row as u32);
                for c in 0..3 {
                    px.0[c] = acc[c].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

// Mirror index `i` into 0..n without repeating the edge pixel (dcb|abcd|cba).
fn reflect101(i: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as i64 - 1);
    let m = i.rem_euclid(period);
    (if m >= n as i64 { period - m } else { m }) as usize
}

/// Blur every region of `image` in place. Regions are processed in order,
/// each against the pixels as they are at that point, so overlapping regions
/// are blurred twice. No regions leaves the image untouched.
pub fn anonymize(
    image: &mut RgbImage,
    regions: &[Region],
    blur: &GaussianBlur,
) -> Result<(), AnonymizeError> {
    let (width, height) = image.dimensions();
    for region in regions {
        if Region::new(region.x, region.y, region.width, region.height, width, height).is_none() {
            return Err(AnonymizeError::RegionOutOfBounds {
                region: *region,
                width,
                height,
            });
        }
    }
    for region in regions {
        blur.apply(image, *region);
    }
    Ok(())
}

/// Decode any supported format (JPEG, PNG) into an 8-bit RGB buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, AnonymizeError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: JpegQuality) -> Result<Vec<u8>, AnonymizeError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.get()).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// An image ready for the transfer codec.
#[derive(Debug, Clone)]
pub struct Anonymized {
    /// JPEG bytes.
    pub data: Vec<u8>,
    pub regions: Vec<Region>,
}

/// Detection plus blurring plus re-encoding, bundled for the upload and
/// preview commands.
pub struct Anonymizer {
    detector: Box<dyn RegionDetector>,
    blur: GaussianBlur,
    jpeg_quality: JpegQuality,
}

impl Anonymizer {
    pub fn new(
        detector: Box<dyn RegionDetector>,
        blur: GaussianBlur,
        jpeg_quality: JpegQuality,
    ) -> Self {
        Anonymizer {
            detector,
            blur,
            jpeg_quality,
        }
    }

    /// Decode `bytes`, blur every detected region and encode the result as JPEG.
    pub fn process(&self, bytes: &[u8]) -> Result<Anonymized, AnonymizeError> {
        let mut image = decode_image(bytes)?;
        let gray = image::imageops::grayscale(&image);
        let regions = self.detector.detect(&gray);
        debug!(
            "blurring {} region(s) with kernel {}",
            regions.len(),
            self.blur.strength().get()
        );
        anonymize(&mut image, &regions, &self.blur)?;
        let data = encode_jpeg(&image, self.jpeg_quality)?;
        Ok(Anonymized { data, regions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn blur(k: u32) -> GaussianBlur {
        GaussianBlur::new(BlurStrength::new(k).unwrap(), 30.0)
    }

    fn quality() -> JpegQuality {
        JpegQuality::new(90).unwrap()
    }

    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    fn variance(image: &RgbImage, region: Region) -> f64 {
        let values: Vec<f64> = (region.y..region.y + region.height)
            .flat_map(|y| (region.x..region.x + region.width).map(move |x| (x, y)))
            .map(|(x, y)| image.get_pixel(x, y).0[0] as f64)
            .collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
    }

    #[test]
    fn even_and_zero_strengths_are_rejected() {
        assert!(BlurStrength::new(0).is_err());
        assert!(BlurStrength::new(98).is_err());
        assert_eq!(BlurStrength::new(99).unwrap().get(), 99);
    }

    #[test]
    fn jpeg_quality_outside_range_is_rejected() {
        assert!(matches!(
            JpegQuality::new(0),
            Err(AnonymizeError::InvalidJpegQuality(0))
        ));
        assert!(JpegQuality::new(101).is_err());
        assert_eq!(JpegQuality::new(1).unwrap().get(), 1);
        assert_eq!(JpegQuality::new(100).unwrap().get(), 100);
    }

    #[test]
    fn kernel_is_normalised() {
        for k in [1, 3, 15, 99] {
            let sum: f32 = blur(k).kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "kernel {k} sums to {sum}");
        }
    }

    #[test]
    fn reflection_stays_in_range() {
        assert_eq!(reflect101(-1, 4), 1);
        assert_eq!(reflect101(4, 4), 2);
        assert_eq!(reflect101(-60, 4), 0);
        assert_eq!(reflect101(7, 1), 0);
    }

    #[test]
    fn no_regions_leaves_image_identical() {
        let original = checkerboard(16);
        let mut image = original.clone();
        anonymize(&mut image, &[], &blur(99)).unwrap();
        assert_eq!(image.as_raw(), original.as_raw());
    }

    #[test]
    fn blur_touches_only_the_region() {
        for k in [3, 5, 9, 99] {
            let original = checkerboard(24);
            let mut image = original.clone();
            let region = Region::new(4, 6, 8, 8, 24, 24).unwrap();
            anonymize(&mut image, &[region], &blur(k)).unwrap();

            for (x, y, px) in image.enumerate_pixels() {
                let inside = x >= 4 && x < 12 && y >= 6 && y < 14;
                if inside {
                    assert_ne!(px, original.get_pixel(x, y), "k={k} ({x},{y}) unchanged");
                } else {
                    assert_eq!(px, original.get_pixel(x, y), "k={k} ({x},{y}) changed");
                }
            }
            assert!(variance(&image, region) < variance(&original, region));
        }
    }

    #[test]
    fn solid_region_keeps_its_colour() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([10, 200, 30]));
        let region = Region::new(5, 5, 10, 10, 20, 20).unwrap();
        anonymize(&mut image, &[region], &blur(7)).unwrap();
        assert!(image.pixels().all(|p| *p == Rgb([10, 200, 30])));
    }

    #[test]
    fn region_outside_image_is_rejected() {
        let mut image = checkerboard(8);
        let region = Region {
            x: 4,
            y: 4,
            width: 8,
            height: 8,
        };
        assert!(matches!(
            anonymize(&mut image, &[region], &blur(3)),
            Err(AnonymizeError::RegionOutOfBounds { .. })
        ));
    }

    struct Fixed(Vec<Region>);

    impl RegionDetector for Fixed {
        fn detect(&self, _gray: &image::GrayImage) -> Vec<Region> {
            self.0.clone()
        }
    }

    #[test]
    fn process_reencodes_as_jpeg() {
        let mut png = Vec::new();
        let source = checkerboard(32);
        image::DynamicImage::ImageRgb8(source)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();

        let region = Region::new(8, 8, 16, 16, 32, 32).unwrap();
        let anonymizer = Anonymizer::new(Box::new(Fixed(vec![region])), blur(9), quality());
        let out = anonymizer.process(&png).unwrap();
        assert_eq!(&out.data[..2], &[0xFF, 0xD8]);
        assert_eq!(out.regions, vec![region]);
    }

    #[test]
    fn process_rejects_non_images() {
        let anonymizer = Anonymizer::new(Box::new(Fixed(vec![])), blur(3), quality());
        assert!(matches!(
            anonymizer.process(b"definitely not an image"),
            Err(AnonymizeError::Image(_))
        ));
    }
}
