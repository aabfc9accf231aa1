//! Upload normalisation: any raster image in, bounded RGB JPEG out.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use numis_core::PipelineConfig;
use tracing::debug;

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// Longest edge after downsampling, in pixels.
    pub max_dimension: u32,
    /// JPEG quality, clamped to 1-100.
    pub quality: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            quality: 80,
        }
    }
}

impl From<&PipelineConfig> for ImageOptions {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            max_dimension: cfg.max_image_dimension,
            quality: cfg.jpeg_quality,
        }
    }
}

/// Decode `bytes` (JPEG, PNG, WebP, BMP, GIF or TIFF), convert to RGB,
/// downsample so neither edge exceeds `max_dimension` (aspect ratio kept),
/// and re-encode as JPEG.
///
/// Deterministic for identical input and options.
pub fn preprocess(bytes: &[u8], opts: &ImageOptions) -> Result<Vec<u8>, PipelineError> {
    let img = image::load_from_memory(bytes).map_err(PipelineError::ImageDecode)?;
    let (width, height) = (img.width(), img.height());

    let max = opts.max_dimension.max(1);
    let img = if width > max || height > max {
        img.resize(max, max, FilterType::Triangle)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, opts.quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(PipelineError::ImageEncode)?;
    let out = out.into_inner();

    debug!(
        width,
        height,
        out_width = rgb.width(),
        out_height = rgb.height(),
        in_bytes = bytes.len(),
        out_bytes = out.len(),
        "preprocessed image"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, DynamicImage, ImageFormat, Rgba, RgbaImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 200])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    /// PNG with an alpha channel, so the RGB conversion is exercised.
    fn png(width: u32, height: u32) -> Vec<u8> {
        encoded(width, height, ImageFormat::Png)
    }

    #[test]
    fn downsamples_large_image() {
        let out = preprocess(&png(2000, 1000), &ImageOptions::default()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 512));
    }

    #[test]
    fn portrait_image_limited_by_height() {
        let out = preprocess(&png(600, 3000), &ImageOptions::default()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.height(), 1024);
        assert!(decoded.width() <= 1024);
    }

    #[test]
    fn small_image_keeps_size() {
        let out = preprocess(&png(300, 200), &ImageOptions::default()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 200));
    }

    #[test]
    fn output_is_rgb_jpeg() {
        let out = preprocess(&png(64, 64), &ImageOptions::default()).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
    }

    #[test]
    fn deterministic() {
        let input = png(1500, 1500);
        let opts = ImageOptions {
            max_dimension: 768,
            quality: 75,
        };
        assert_eq!(preprocess(&input, &opts).unwrap(), preprocess(&input, &opts).unwrap());
    }

    #[test]
    fn camera_and_scanner_formats_accepted() {
        for format in [ImageFormat::Bmp, ImageFormat::Gif, ImageFormat::Tiff] {
            let out = preprocess(&encoded(1100, 550, format), &ImageOptions::default())
                .unwrap_or_else(|e| panic!("{format:?}: {e}"));
            let decoded = image::load_from_memory(&out).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (1024, 512), "{format:?}");
        }
    }

    #[test]
    fn garbage_is_decode_error() {
        let result = preprocess(b"definitely not an image", &ImageOptions::default());
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn options_from_config() {
        let cfg = PipelineConfig {
            max_image_dimension: 800,
            jpeg_quality: 85,
            ..Default::default()
        };
        assert_eq!(
            ImageOptions::from(&cfg),
            ImageOptions {
                max_dimension: 800,
                quality: 85
            }
        );
    }
}
