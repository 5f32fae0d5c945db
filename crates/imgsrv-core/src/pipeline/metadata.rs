//! Image metadata for document sidecars.

use exif::{In, Reader, Tag, Value};
use image::ImageFormat;
use std::io::Cursor;

use super::decode::{format_to_string, mime_type};
use crate::types::ImageMetadata;

/// Builds [`ImageMetadata`] from an encoded image and its decoded properties.
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Describe an encoded image. Density comes from EXIF when present.
    pub fn describe(
        bytes: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        format: ImageFormat,
    ) -> ImageMetadata {
        ImageMetadata {
            width,
            height,
            channels,
            density: Self::density(bytes),
            size: bytes.len() as u64,
            mimetype: mime_type(format),
            format: format_to_string(format),
        }
    }

    /// Horizontal resolution in pixels per inch.
    ///
    /// Returns `None` if the file has no EXIF data or if extraction fails.
    pub fn density(bytes: &[u8]) -> Option<u32> {
        let exif = Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .ok()?;
        let field = exif.get_field(Tag::XResolution, In::PRIMARY)?;
        let dpi = match &field.value {
            Value::Rational(v) => v.first()?.to_f64(),
            _ => return None,
        };

        // ResolutionUnit 3 is centimetres
        let per_cm = matches!(
            exif.get_field(Tag::ResolutionUnit, In::PRIMARY)
                .and_then(|f| f.value.get_uint(0)),
            Some(3)
        );
        let dpi = if per_cm { dpi * 2.54 } else { dpi };

        (dpi.is_finite() && dpi > 0.0).then(|| dpi.round() as u32)
    }
}
