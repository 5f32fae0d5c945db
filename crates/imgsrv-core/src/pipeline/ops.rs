//! Raster primitives behind each [`TransformStep`](crate::geometry::TransformStep).
//!
//! All operations work on RGBA buffers and return a new buffer; inputs are
//! never modified in place. Steps that grow the canvas are checked against
//! the dimension limit before anything is allocated.

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tiny_skia::{
    BlendMode, Color, ColorU8, FillRule, FilterQuality, IntSize, Mask, PathBuilder, Pixmap,
    PixmapPaint, Transform,
};

use crate::error::{DeriveError, DeriveResult};
use crate::geometry::{rotated_bounds, round_half_up, Background, Point};

/// Channel difference below which a pixel counts as border during trim.
const TRIM_THRESHOLD: u8 = 10;

fn rgba(bg: Background) -> Rgba<u8> {
    Rgba([bg.r, bg.g, bg.b, bg.a])
}

/// Reject a canvas before allocating it. `None` means the size overflowed.
fn check_canvas(
    step: &str,
    width: Option<u32>,
    height: Option<u32>,
    max_dimension: u32,
) -> DeriveResult<(u32, u32)> {
    match (width, height) {
        (Some(w), Some(h)) if w <= max_dimension && h <= max_dimension => Ok((w, h)),
        (w, h) => Err(DeriveError::ImageTooLarge {
            path: PathBuf::from(step),
            width: w.unwrap_or(u32::MAX),
            height: h.unwrap_or(u32::MAX),
            max_dim: max_dimension,
        }),
    }
}

fn to_pixmap(img: &RgbaImage) -> DeriveResult<Pixmap> {
    let size = IntSize::from_wh(img.width(), img.height())
        .ok_or_else(|| DeriveError::transform("pixmap", "image has no pixels"))?;
    let data = img
        .pixels()
        .flat_map(|p| {
            let c = ColorU8::from_rgba(p[0], p[1], p[2], p[3]).premultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    Pixmap::from_vec(data, size)
        .ok_or_else(|| DeriveError::transform("pixmap", "buffer does not match its size"))
}

fn from_pixmap(pixmap: &Pixmap) -> DeriveResult<RgbaImage> {
    let data = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .ok_or_else(|| DeriveError::transform("pixmap", "buffer does not match its size"))
}

/// Pad each side of the canvas with `bg`.
pub fn extend(
    img: &RgbaImage,
    top: u32,
    left: u32,
    right: u32,
    bottom: u32,
    bg: Background,
    max_dimension: u32,
) -> DeriveResult<RgbaImage> {
    let (width, height) = check_canvas(
        "extend",
        img.width().checked_add(left).and_then(|w| w.checked_add(right)),
        img.height().checked_add(top).and_then(|h| h.checked_add(bottom)),
        max_dimension,
    )?;
    let mut canvas = RgbaImage::from_pixel(width, height, rgba(bg));
    imageops::replace(&mut canvas, img, i64::from(left), i64::from(top));
    Ok(canvas)
}

/// Crop a region that must lie entirely inside the canvas.
pub fn extract(img: &RgbaImage, left: i64, top: i64, width: u32, height: u32) -> DeriveResult<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(DeriveError::transform(
            "extract",
            format!("region {width}x{height} is empty"),
        ));
    }
    let fits = left >= 0
        && top >= 0
        && left + i64::from(width) <= i64::from(img.width())
        && top + i64::from(height) <= i64::from(img.height());
    if !fits {
        return Err(DeriveError::transform(
            "extract",
            format!(
                "region {width}x{height}+{left}+{top} is outside the {}x{} image",
                img.width(),
                img.height()
            ),
        ));
    }
    Ok(imageops::crop_imm(img, left as u32, top as u32, width, height).to_image())
}

/// Rotate clockwise by `degrees`, growing the canvas to the rotated bounds.
/// Uncovered corners are filled with `bg`.
pub fn rotate(
    img: &RgbaImage,
    degrees: f64,
    bg: Background,
    max_dimension: u32,
) -> DeriveResult<RgbaImage> {
    let degrees = degrees.rem_euclid(360.0);
    // quarter turns are exact
    if degrees == 0.0 {
        return Ok(img.clone());
    }
    if degrees == 90.0 {
        return Ok(imageops::rotate90(img));
    }
    if degrees == 180.0 {
        return Ok(imageops::rotate180(img));
    }
    if degrees == 270.0 {
        return Ok(imageops::rotate270(img));
    }

    let (src_w, src_h) = (img.width(), img.height());
    let (dst_w, dst_h) = rotated_bounds(src_w, src_h, degrees);
    let (dst_w, dst_h) = check_canvas("rotate", Some(dst_w), Some(dst_h), max_dimension)?;

    let source = to_pixmap(img)?;
    let mut canvas = Pixmap::new(dst_w, dst_h)
        .ok_or_else(|| DeriveError::transform("rotate", format!("cannot allocate {dst_w}x{dst_h}")))?;
    canvas.fill(Color::from_rgba8(bg.r, bg.g, bg.b, bg.a));

    let (dst_wf, dst_hf) = (dst_w as f32, dst_h as f32);
    // centre the source on the canvas, then turn about the canvas centre
    let transform = Transform::from_rotate_at(degrees as f32, dst_wf / 2.0, dst_hf / 2.0)
        .pre_translate((dst_wf - src_w as f32) / 2.0, (dst_hf - src_h as f32) / 2.0);
    let paint = PixmapPaint {
        blend_mode: BlendMode::Source,
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    canvas.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);

    from_pixmap(&canvas)
}

/// Mask the canvas with a polygon in canvas coordinates.
///
/// With `cutout`, pixels outside the polygon become transparent; otherwise
/// pixels inside it do. Coverage follows the nonzero winding rule.
pub fn overlay_mask(img: &RgbaImage, points: &[Point], cutout: bool) -> DeriveResult<RgbaImage> {
    let mut mask = Mask::new(img.width(), img.height())
        .ok_or_else(|| DeriveError::transform("overlay", "image has no pixels"))?;
    if let Some(path) = polygon_path(points) {
        mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
    }

    let mut out = img.clone();
    for (pixel, coverage) in out.pixels_mut().zip(mask.data()) {
        let keep = if cutout { *coverage } else { 255 - *coverage };
        pixel[3] = ((u16::from(pixel[3]) * u16::from(keep) + 127) / 255) as u8;
    }
    Ok(out)
}

/// A closed path through `points`; `None` when fewer than three are given.
fn polygon_path(points: &[Point]) -> Option<tiny_skia::Path> {
    let [first, rest @ ..] = points else {
        return None;
    };
    if rest.len() < 2 {
        return None;
    }
    let mut builder = PathBuilder::new();
    builder.move_to(first.x as f32, first.y as f32);
    for p in rest {
        builder.line_to(p.x as f32, p.y as f32);
    }
    builder.close();
    builder.finish()
}

/// Composite onto an opaque background.
pub fn flatten(img: &RgbaImage, bg: Background) -> RgbaImage {
    let base = [f64::from(bg.r), f64::from(bg.g), f64::from(bg.b)];
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let alpha = f64::from(pixel[3]) / 255.0;
        for (channel, base) in pixel.0.iter_mut().take(3).zip(base) {
            *channel = (f64::from(*channel) * alpha + base * (1.0 - alpha)).round() as u8;
        }
        pixel[3] = 255;
    }
    out
}

/// Remove the border that matches the top-left pixel. A uniform image is
/// returned unchanged.
pub fn trim(img: &RgbaImage) -> RgbaImage {
    let Some(reference) = img.get_pixel_checked(0, 0).copied() else {
        return img.clone();
    };
    let differs = |p: &Rgba<u8>| {
        p.0.iter()
            .zip(reference.0.iter())
            .any(|(a, b)| a.abs_diff(*b) > TRIM_THRESHOLD)
    };

    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0, 0);
    for (x, y, p) in img.enumerate_pixels() {
        if differs(p) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x == u32::MAX {
        return img.clone();
    }
    imageops::crop_imm(img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
}

/// Resize. With both dimensions the image covers the box and is centre
/// cropped; with one, the other follows the aspect ratio.
pub fn resize(
    img: &RgbaImage,
    width: Option<u32>,
    height: Option<u32>,
    max_dimension: u32,
) -> DeriveResult<RgbaImage> {
    let (w, h) = (f64::from(img.width()), f64::from(img.height()));
    let follow = |target: u32, ratio: f64| {
        let value = round_half_up(f64::from(target) * ratio).max(1.0);
        (value <= f64::from(u32::MAX)).then_some(value as u32)
    };
    let out = match (width, height) {
        (Some(tw), Some(th)) => {
            check_canvas("resize", Some(tw), Some(th), max_dimension)?;
            image::DynamicImage::ImageRgba8(img.clone())
                .resize_to_fill(tw, th, FilterType::Lanczos3)
                .into_rgba8()
        }
        (Some(tw), None) => {
            let (tw, th) = check_canvas("resize", Some(tw), follow(tw, h / w), max_dimension)?;
            imageops::resize(img, tw, th, FilterType::Lanczos3)
        }
        (None, Some(th)) => {
            let (tw, th) = check_canvas("resize", follow(th, w / h), Some(th), max_dimension)?;
            imageops::resize(img, tw, th, FilterType::Lanczos3)
        }
        (None, None) => img.clone(),
    };
    Ok(out)
}

/// Convert to luminance, keeping alpha.
pub fn grayscale(img: &RgbaImage) -> RgbaImage {
    let luma = image::DynamicImage::ImageRgba8(img.clone()).into_luma_alpha8();
    image::DynamicImage::ImageLumaA8(luma).into_rgba8()
}
