//! The image backend seam.
//!
//! The executor only speaks [`TransformStep`]s; a backend decides how they
//! are carried out on pixels. [`RasterBackend`] is the in-process
//! implementation built on the `image` crate, with `tiny-skia` drawing
//! rotations and polygon masks.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use super::decode::{format_to_string, ImageDecoder};
use super::ops;
use crate::error::{DeriveError, DeriveResult};
use crate::geometry::TransformStep;

/// Executes transform steps against an in-memory canvas.
pub trait ImageBackend: Send + Sync {
    type Canvas: Send;

    /// Decode source bytes into a canvas.
    fn decode(&self, bytes: &[u8]) -> DeriveResult<Self::Canvas>;

    /// Apply one step, consuming the previous canvas.
    fn apply(&self, canvas: Self::Canvas, step: &TransformStep) -> DeriveResult<Self::Canvas>;

    /// Current `(width, height)`.
    fn dimensions(&self, canvas: &Self::Canvas) -> (u32, u32);

    /// Encode in the source's format. Returns the bytes and channel count.
    fn encode(&self, canvas: &Self::Canvas) -> DeriveResult<Encoded>;
}

/// Encoder output.
#[derive(Debug)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub channels: u8,
}

/// Canvas of the raster backend.
#[derive(Debug, Clone)]
pub struct RasterCanvas {
    pixels: RgbaImage,
    format: ImageFormat,
    has_alpha: bool,
    grayscale: bool,
}

impl RasterCanvas {
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Pure-Rust backend on top of the `image` crate.
#[derive(Debug, Clone)]
pub struct RasterBackend {
    max_dimension: u32,
    jpeg_quality: u8,
}

impl RasterBackend {
    pub fn new(max_dimension: u32, jpeg_quality: u8) -> Self {
        Self {
            max_dimension,
            jpeg_quality,
        }
    }
}

impl ImageBackend for RasterBackend {
    type Canvas = RasterCanvas;

    fn decode(&self, bytes: &[u8]) -> DeriveResult<RasterCanvas> {
        let decoded = ImageDecoder::decode_bytes_sync(bytes, Path::new("source"), self.max_dimension)?;
        let color = decoded.image.color();
        Ok(RasterCanvas {
            has_alpha: color.has_alpha(),
            grayscale: !color.has_color(),
            format: decoded.format,
            pixels: decoded.image.into_rgba8(),
        })
    }

    fn apply(&self, canvas: RasterCanvas, step: &TransformStep) -> DeriveResult<RasterCanvas> {
        let RasterCanvas {
            pixels,
            format,
            mut has_alpha,
            mut grayscale,
        } = canvas;

        let pixels = match step {
            TransformStep::Extend {
                top,
                left,
                right,
                bottom,
                background,
            } => ops::extend(
                &pixels,
                *top,
                *left,
                *right,
                *bottom,
                *background,
                self.max_dimension,
            )?,
            TransformStep::ExtractRect {
                left,
                top,
                width,
                height,
            } => ops::extract(&pixels, *left, *top, *width, *height)?,
            TransformStep::Rotate {
                degrees,
                background,
            } => ops::rotate(&pixels, *degrees, *background, self.max_dimension)?,
            TransformStep::OverlayMask { points, cutout } => {
                has_alpha = true;
                ops::overlay_mask(&pixels, points, *cutout)?
            }
            TransformStep::Flatten { background } => {
                has_alpha = false;
                ops::flatten(&pixels, *background)
            }
            TransformStep::Trim => ops::trim(&pixels),
            TransformStep::Resize { width, height } => {
                ops::resize(&pixels, *width, *height, self.max_dimension)?
            }
            TransformStep::Grayscale => {
                grayscale = true;
                ops::grayscale(&pixels)
            }
        };

        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(DeriveError::transform(step.name(), "produced an empty image"));
        }

        Ok(RasterCanvas {
            pixels,
            format,
            has_alpha,
            grayscale,
        })
    }

    fn dimensions(&self, canvas: &RasterCanvas) -> (u32, u32) {
        canvas.pixels.dimensions()
    }

    fn encode(&self, canvas: &RasterCanvas) -> DeriveResult<Encoded> {
        let format = canvas.format;
        let encode_err = |e: image::ImageError| DeriveError::Encode {
            format: format_to_string(format),
            message: e.to_string(),
        };

        let rgba = DynamicImage::ImageRgba8(canvas.pixels.clone());
        // JPEG has no alpha; the webp encoder only takes RGB(A)
        let keep_alpha = canvas.has_alpha && format != ImageFormat::Jpeg;
        let luma_ok = matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Tiff);
        let image = match (canvas.grayscale && luma_ok, keep_alpha) {
            (true, true) => DynamicImage::ImageLumaA8(rgba.into_luma_alpha8()),
            (true, false) => DynamicImage::ImageLuma8(rgba.into_luma8()),
            (false, true) => rgba,
            (false, false) => DynamicImage::ImageRgb8(rgba.into_rgb8()),
        };
        let channels = image.color().channel_count();

        let mut buffer = Cursor::new(Vec::new());
        if format == ImageFormat::Jpeg {
            image
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality))
                .map_err(encode_err)?;
        } else {
            image.write_to(&mut buffer, format).map_err(encode_err)?;
        }

        Ok(Encoded {
            bytes: buffer.into_inner(),
            format,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Background;
    use image::{Rgba, RgbaImage};

    fn encode_png(img: RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn backend() -> RasterBackend {
        RasterBackend::new(10_000, 80)
    }

    #[test]
    fn test_decode_apply_encode_keeps_format() {
        let bytes = encode_png(RgbaImage::from_pixel(20, 10, Rgba([1, 2, 3, 255])));
        let b = backend();
        let canvas = b.decode(&bytes).unwrap();
        let canvas = b
            .apply(
                canvas,
                &TransformStep::Extend {
                    top: 1,
                    left: 2,
                    right: 3,
                    bottom: 4,
                    background: Background::WHITE,
                },
            )
            .unwrap();
        assert_eq!(b.dimensions(&canvas), (25, 15));

        let encoded = b.encode(&canvas).unwrap();
        assert_eq!(encoded.format, ImageFormat::Png);
        assert_eq!(encoded.channels, 4);
        let round = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((round.width(), round.height()), (25, 15));
    }

    #[test]
    fn test_grayscale_png_encodes_single_channel() {
        let bytes = encode_png(RgbaImage::from_pixel(4, 4, Rgba([200, 10, 10, 255])));
        let b = backend();
        let mut canvas = b.decode(&bytes).unwrap();
        canvas = b.apply(canvas, &TransformStep::Flatten { background: Background::WHITE }).unwrap();
        canvas = b.apply(canvas, &TransformStep::Grayscale).unwrap();
        assert_eq!(b.encode(&canvas).unwrap().channels, 1);
    }

    #[test]
    fn test_extract_failure_names_step() {
        let bytes = encode_png(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let b = backend();
        let canvas = b.decode(&bytes).unwrap();
        let err = b
            .apply(
                canvas,
                &TransformStep::ExtractRect {
                    left: -1,
                    top: 0,
                    width: 2,
                    height: 2,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("extract"));
    }

    #[test]
    fn test_canvas_growth_is_bounded_by_max_dimension() {
        let bytes = encode_png(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])));
        let b = RasterBackend::new(100, 80);
        let canvas = b.decode(&bytes).unwrap();
        let err = b
            .apply(
                canvas,
                &TransformStep::Extend {
                    top: 0,
                    left: 15_000,
                    right: 0,
                    bottom: 0,
                    background: Background::WHITE,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DeriveError::ImageTooLarge { max_dim: 100, .. }));
    }
}
