//! Adaptive JPEG re-encoder that brings photos under an upload byte budget.
//!
//! Quality is lowered first, in fixed steps down to a floor; only once quality
//! is exhausted does the image shrink, by a constant factor down to a scale
//! floor. The search is best effort: when both floors are reached the last
//! render is returned even if it is still over budget.

use crate::common::config::CompressorConfig;
use crate::common::{IdCaptureError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage};

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub max_bytes: usize,
    pub max_dimension: u32,
    pub initial_quality: f32,
    pub min_quality: f32,
    pub quality_step: f32,
    pub min_scale: f32,
    pub scale_factor: f32,
    pub preview_size: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::from(&CompressorConfig::default())
    }
}

impl From<&CompressorConfig> for CompressionSettings {
    fn from(config: &CompressorConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_dimension: config.max_dimension,
            initial_quality: config.initial_quality,
            min_quality: config.min_quality,
            quality_step: config.quality_step,
            min_scale: config.min_scale,
            scale_factor: config.scale_factor,
            preview_size: config.preview_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub preview: DynamicImage,
    pub width: u32,
    pub height: u32,
    /// Settings that produced `bytes`.
    pub quality: f32,
    pub scale: f32,
    /// Scale floor actually in force (never above the initial dimension-capped scale).
    pub scale_floor: f32,
    /// Loop state when the search stopped; differs from `quality`/`scale`
    /// when the last candidate was larger than the kept render.
    pub search_quality: f32,
    pub search_scale: f32,
    pub iterations: u32,
    /// Size of the current best render after each measurement.
    pub size_history: Vec<usize>,
    /// Input was already within budget and is returned as-is.
    pub unchanged: bool,
}

impl CompressedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn within_budget(&self, max_bytes: usize) -> bool {
        self.bytes.len() <= max_bytes
    }

    /// Whether the search stopped because both floors were hit.
    pub fn floors_reached(&self, settings: &CompressionSettings) -> bool {
        self.search_quality <= settings.min_quality && self.search_scale <= self.scale_floor
    }
}

/// Decodes `raw` and reduces it to fit `settings.max_bytes`.
pub fn compress(raw: &[u8], settings: &CompressionSettings) -> Result<CompressedImage> {
    let image = image::load_from_memory(raw)
        .map_err(|e| IdCaptureError::EncodingFailure(format!("Failed to decode image: {}", e)))?;

    if raw.len() <= settings.max_bytes {
        tracing::debug!("Image already within budget ({} <= {} bytes)", raw.len(), settings.max_bytes);
        return Ok(CompressedImage {
            bytes: raw.to_vec(),
            preview: image.thumbnail(settings.preview_size, settings.preview_size),
            width: image.width(),
            height: image.height(),
            quality: settings.initial_quality,
            scale: 1.0,
            scale_floor: settings.min_scale,
            search_quality: settings.initial_quality,
            search_scale: 1.0,
            iterations: 0,
            size_history: vec![raw.len()],
            unchanged: true,
        });
    }

    compress_frame(&image, settings)
}

/// Runs the reduction loop on an already decoded image (e.g. a camera frame).
pub fn compress_frame(image: &DynamicImage, settings: &CompressionSettings) -> Result<CompressedImage> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(IdCaptureError::EncodingFailure("Image has no pixels".into()));
    }

    let max_dim = settings.max_dimension as f32;
    let initial_scale = 1.0f32
        .min(max_dim / width as f32)
        .min(max_dim / height as f32);
    let scale_floor = settings.min_scale.min(initial_scale);

    let mut quality = settings.initial_quality;
    let mut scale = initial_scale;
    let mut best = render(image, scale, quality)?;
    let mut size_history = vec![best.bytes.len()];
    let mut iterations = 0u32;

    while best.bytes.len() > settings.max_bytes
        && (quality > settings.min_quality || scale > scale_floor)
    {
        if quality > settings.min_quality {
            quality = (quality - settings.quality_step).max(settings.min_quality);
        } else {
            scale = (scale * settings.scale_factor).max(scale_floor);
        }
        iterations += 1;

        let candidate = render(image, scale, quality)?;
        tracing::trace!(
            "Compression pass {}: quality={:.2} scale={:.3} size={}",
            iterations, quality, scale, candidate.bytes.len()
        );
        if candidate.bytes.len() <= best.bytes.len() {
            best = candidate;
        }
        size_history.push(best.bytes.len());
    }

    if best.bytes.len() > settings.max_bytes {
        tracing::warn!(
            "Image still {} bytes after {} passes (budget {}), using best effort",
            best.bytes.len(), iterations, settings.max_bytes
        );
    } else {
        tracing::debug!(
            "Compressed {}x{} to {}x{} ({} bytes) in {} passes",
            width, height, best.width, best.height, best.bytes.len(), iterations
        );
    }

    Ok(CompressedImage {
        bytes: best.bytes,
        preview: image.thumbnail(settings.preview_size, settings.preview_size),
        width: best.width,
        height: best.height,
        quality: best.quality,
        scale: best.scale,
        scale_floor,
        search_quality: quality,
        search_scale: scale,
        iterations,
        size_history,
        unchanged: false,
    })
}

/// Async wrapper; encoding is CPU bound so it runs on the blocking pool.
pub async fn compress_async(raw: Vec<u8>, settings: CompressionSettings) -> Result<CompressedImage> {
    tokio::task::spawn_blocking(move || compress(&raw, &settings))
        .await
        .map_err(|e| IdCaptureError::EncodingFailure(format!("Encoder task failed: {}", e)))?
}

pub async fn compress_frame_async(
    image: DynamicImage,
    settings: CompressionSettings,
) -> Result<CompressedImage> {
    tokio::task::spawn_blocking(move || compress_frame(&image, &settings))
        .await
        .map_err(|e| IdCaptureError::EncodingFailure(format!("Encoder task failed: {}", e)))?
}

struct Render {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    quality: f32,
    scale: f32,
}

fn render(image: &DynamicImage, scale: f32, quality: f32) -> Result<Render> {
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);

    let scaled;
    let source = if width == image.width() && height == image.height() {
        image
    } else {
        scaled = image.resize_exact(width, height, FilterType::Triangle);
        &scaled
    };

    let jpeg_quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality);
    let encoded = match source {
        DynamicImage::ImageLuma8(gray) => encoder.encode(gray.as_raw(), width, height, ColorType::L8),
        other => {
            let rgb = other.to_rgb8();
            encoder.encode(rgb.as_raw(), width, height, ColorType::Rgb8)
        }
    };
    encoded.map_err(|e| IdCaptureError::EncodingFailure(format!("JPEG encode failed: {}", e)))?;

    Ok(Render { bytes, width, height, quality, scale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageOutputFormat, Rgb, RgbImage};
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn noise(width: u32, height: u32) -> DynamicImage {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let img: RgbImage = ImageBuffer::from_fn(width, height, |_, _| {
            Rgb([rng.gen(), rng.gen(), rng.gen()])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn png(image: &DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    fn settings(max_bytes: usize) -> CompressionSettings {
        CompressionSettings { max_bytes, ..CompressionSettings::default() }
    }

    fn non_increasing(sizes: &[usize]) -> bool {
        sizes.windows(2).all(|w| w[1] <= w[0])
    }

    #[test]
    fn input_within_budget_is_returned_unchanged() {
        let flat = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 48, Rgb([200, 10, 10])));
        let raw = png(&flat);
        let out = compress(&raw, &settings(raw.len())).unwrap();

        assert!(out.unchanged);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.bytes, raw);
        assert_eq!((out.width, out.height), (64, 48));
    }

    #[test]
    fn oversized_input_meets_budget_or_exhausts_floors() {
        let raw = png(&noise(600, 400));
        let s = settings(40_000);
        assert!(raw.len() > s.max_bytes);

        let out = compress(&raw, &s).unwrap();
        assert!(!out.unchanged);
        assert!(out.within_budget(s.max_bytes) || out.floors_reached(&s));
        assert!(non_increasing(&out.size_history));
        // six quality steps (0.82 -> 0.40) and five scale steps (1.0 -> 0.5)
        assert!(out.iterations <= 11);
    }

    #[test]
    fn impossible_budget_stops_at_both_floors() {
        let raw = png(&noise(400, 300));
        let s = settings(500);

        let out = compress(&raw, &s).unwrap();
        assert!(out.len() > s.max_bytes);
        assert!((out.search_quality - s.min_quality).abs() < f32::EPSILON);
        assert!((out.search_scale - s.min_scale).abs() < f32::EPSILON);
        assert!(out.floors_reached(&s));
        assert!(non_increasing(&out.size_history));
    }

    #[test]
    fn reported_settings_describe_returned_bytes() {
        let raw = png(&noise(400, 300));
        let s = settings(500);

        let out = compress(&raw, &s).unwrap();
        assert_eq!(out.width, (400.0 * out.scale).round() as u32);
        assert_eq!(out.height, (300.0 * out.scale).round() as u32);
        assert!(out.quality >= out.search_quality);
        assert!(out.scale >= out.search_scale);

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (out.width, out.height));
        assert_eq!(out.len(), *out.size_history.last().unwrap());
    }

    #[test]
    fn large_images_are_capped_to_max_dimension() {
        let s = CompressionSettings { max_dimension: 320, ..settings(2_000_000) };
        let out = compress_frame(&noise(640, 200), &s).unwrap();

        assert_eq!(out.iterations, 0);
        assert_eq!((out.width, out.height), (320, 100));
        assert!((out.scale - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn scale_never_grows_past_dimension_cap() {
        let s = CompressionSettings { max_dimension: 100, ..settings(200) };
        let out = compress_frame(&noise(400, 100), &s).unwrap();

        // capped scale 0.25 is already below min_scale, so only quality moves
        assert!((out.scale_floor - 0.25).abs() < f32::EPSILON);
        assert!((out.scale - 0.25).abs() < f32::EPSILON);
        assert!(out.floors_reached(&s));
        assert_eq!(out.width, 100);
    }

    #[test]
    fn grayscale_frames_stay_grayscale() {
        let gray = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(32, 32, image::Luma([90u8])));
        let out = compress_frame(&gray, &settings(1_000_000)).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::L8);
    }

    #[test]
    fn garbage_is_an_encoding_failure() {
        let err = compress(b"definitely not an image", &settings(10)).unwrap_err();
        assert!(matches!(err, IdCaptureError::EncodingFailure(_)));
    }
}
