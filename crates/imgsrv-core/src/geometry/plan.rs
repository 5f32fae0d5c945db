//! Transform plans: the ordered pipeline steps derived from request parameters.

use serde::{Deserialize, Serialize};

use crate::params::DeriveParams;

use super::polygon::{round_half_up, rotated_bounds, Point, Polygon};

/// A fill colour for padding, rotation corners and flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Background {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Background {
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };
    pub const BLACK: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };
}

/// One operation issued against the image backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum TransformStep {
    /// Pad the canvas on each side with `background`.
    Extend {
        top: u32,
        left: u32,
        right: u32,
        bottom: u32,
        background: Background,
    },
    /// Crop a region. `left`/`top` may be negative on the polygon path, in
    /// which case the backend rejects the step.
    ExtractRect {
        left: i64,
        top: i64,
        width: u32,
        height: u32,
    },
    /// Rotate clockwise by an arbitrary angle, growing the canvas to fit.
    Rotate { degrees: f64, background: Background },
    /// Apply a polygon mask in canvas-local coordinates. With `cutout`,
    /// pixels outside the polygon become transparent.
    OverlayMask { points: Vec<Point>, cutout: bool },
    /// Composite onto a solid background, removing transparency.
    Flatten { background: Background },
    /// Remove the uniform border introduced by rotation.
    Trim,
    /// Resize; an unset dimension follows the aspect ratio.
    Resize {
        width: Option<u32>,
        height: Option<u32>,
    },
    Grayscale,
}

impl TransformStep {
    /// Short step name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extend { .. } => "extend",
            Self::ExtractRect { .. } => "extract",
            Self::Rotate { .. } => "rotate",
            Self::OverlayMask { .. } => "overlay",
            Self::Flatten { .. } => "flatten",
            Self::Trim => "trim",
            Self::Resize { .. } => "resize",
            Self::Grayscale => "grayscale",
        }
    }
}

/// An immutable, ordered list of steps. Built once per request and consumed
/// once by the executor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformPlan {
    steps: Vec<TransformStep>,
}

impl TransformPlan {
    /// Build the plan for `params` against a source of the given dimensions.
    pub fn build(params: &DeriveParams, source_width: u32, source_height: u32) -> Self {
        let mut steps = Vec::new();

        if let Some(polygon) = &params.polygon {
            if polygon.is_rectangle() {
                plan_rectangle(
                    &mut steps,
                    polygon,
                    params.rotation,
                    source_width,
                    source_height,
                );
            } else {
                plan_polygon(&mut steps, polygon, params.rotation);
            }
        } else if let Some(degrees) = params.rotation {
            // no region: turn the whole image, the canvas grows to fit
            steps.push(TransformStep::Rotate {
                degrees,
                background: Background::WHITE,
            });
        }

        if params.width.is_some() || params.height.is_some() {
            steps.push(TransformStep::Resize {
                width: params.width,
                height: params.height,
            });
        }

        if params.grayscale {
            steps.push(TransformStep::Grayscale);
        }

        Self { steps }
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Rectangle path: pad when the box leaves the source, extract, and for
/// rotations straighten and centre-crop to the polygon's own side lengths.
fn plan_rectangle(
    steps: &mut Vec<TransformStep>,
    polygon: &Polygon,
    rotation: Option<f64>,
    source_width: u32,
    source_height: u32,
) {
    let bbox = polygon.bounding_box();
    let (mut left, mut top) = (bbox.left, bbox.top);
    let (width, height) = (bbox.width, bbox.height);

    let (mut pad_top, mut pad_left) = (0, 0);
    if top < 0 {
        pad_top = -top;
        top = 0;
    }
    if left < 0 {
        pad_left = -left;
        left = 0;
    }
    let pad_right = (left + width - i64::from(source_width) - pad_left).max(0);
    let pad_bottom = (top + height - i64::from(source_height) - pad_top).max(0);

    if pad_top > 0 || pad_left > 0 || pad_right > 0 || pad_bottom > 0 {
        steps.push(TransformStep::Extend {
            top: clamp_u32(pad_top),
            left: clamp_u32(pad_left),
            right: clamp_u32(pad_right),
            bottom: clamp_u32(pad_bottom),
            background: Background::WHITE,
        });
    }

    steps.push(TransformStep::ExtractRect {
        left,
        top,
        width: clamp_u32(width),
        height: clamp_u32(height),
    });

    let Some(degrees) = rotation else {
        return;
    };

    steps.push(TransformStep::Rotate {
        degrees,
        background: Background::BLACK,
    });

    let (source_w, source_h) = rotated_bounds(clamp_u32(width), clamp_u32(height), degrees);
    let (target_w, target_h) = polygon.side_lengths();
    let offset_x = round_half_up((f64::from(source_w) - f64::from(target_w)) / 2.0) as i64;
    let offset_y = round_half_up((f64::from(source_h) - f64::from(target_h)) / 2.0) as i64;

    steps.push(TransformStep::ExtractRect {
        left: offset_x,
        top: offset_y,
        width: target_w,
        height: target_h,
    });
}

/// Arbitrary polygon path. Out-of-bounds polygons are not padded here; the
/// extraction fails instead.
fn plan_polygon(steps: &mut Vec<TransformStep>, polygon: &Polygon, rotation: Option<f64>) {
    let bbox = polygon.bounding_box();

    steps.push(TransformStep::ExtractRect {
        left: bbox.left,
        top: bbox.top,
        width: clamp_u32(bbox.width),
        height: clamp_u32(bbox.height),
    });
    steps.push(TransformStep::OverlayMask {
        points: polygon.translated(bbox.left, bbox.top),
        cutout: true,
    });
    steps.push(TransformStep::Flatten {
        background: Background::WHITE,
    });

    if let Some(degrees) = rotation {
        steps.push(TransformStep::Rotate {
            degrees,
            background: Background::WHITE,
        });
        steps.push(TransformStep::Trim);
    }
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}
