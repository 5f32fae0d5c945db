//! Geometry engine: polygon classification and transform planning.
//!
//! Everything here is pure; no pixels are touched. The executor in
//! [`crate::pipeline`] turns a [`TransformPlan`] into raster operations.

mod plan;
mod polygon;

pub use plan::{Background, TransformPlan, TransformStep};
pub use polygon::{rotated_bounds, round_half_up, BoundingBox, Point, Polygon};
