//! Derivative request parameters.

use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::error::{DeriveError, DeriveResult};
use crate::geometry::Polygon;

/// The parameters that define one derivative of a source image.
///
/// Values are canonical once constructed through [`DeriveParams::from_query`]
/// or [`DeriveParams::normalized`]: a zero rotation is absent, rotations are
/// reduced into `[0, 360)`. Equal requests therefore serialize identically,
/// which is what the cache key relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeriveParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Polygon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub grayscale: bool,
}

impl DeriveParams {
    /// Parse query-string pairs. Unknown keys are ignored.
    pub fn from_query<'a, I>(pairs: I) -> DeriveResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key {
                "polygon" => params.polygon = Some(Polygon::parse(value)?),
                "rotation" => params.rotation = Some(parse_rotation(value)?),
                "width" => params.width = Some(parse_dimension("width", value)?),
                "height" => params.height = Some(parse_dimension("height", value)?),
                "grayscale" | "toGrayscale" => params.grayscale = parse_flag(key, value)?,
                _ => {}
            }
        }
        Ok(params.normalized())
    }

    /// Canonical form of these parameters.
    pub fn normalized(mut self) -> Self {
        self.rotation = self.rotation.and_then(|r| {
            let r = r.rem_euclid(360.0);
            (r != 0.0).then_some(r)
        });
        self
    }

    /// Whether the request asks for the source unchanged.
    pub fn is_empty(&self) -> bool {
        self.polygon.is_none()
            && self.rotation.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && !self.grayscale
    }

    /// Reject parameters the geometry engine cannot work with.
    pub fn validate(&self, limits: &LimitsConfig) -> DeriveResult<()> {
        if let Some(polygon) = &self.polygon {
            if polygon.len() < 3 {
                return Err(DeriveError::InvalidParameters(format!(
                    "polygon needs at least 3 points, got {}",
                    polygon.len()
                )));
            }
            let max = i64::from(limits.max_image_dimension);
            let reach = u64::from(limits.max_image_dimension);
            // any point further out forces a padded canvas beyond the limit
            if let Some(p) = polygon
                .points()
                .iter()
                .find(|p| p.x.unsigned_abs() > reach || p.y.unsigned_abs() > reach)
            {
                return Err(DeriveError::InvalidParameters(format!(
                    "polygon point ({}, {}) lies outside the {max} pixel limit",
                    p.x, p.y
                )));
            }
            let bbox = polygon.bounding_box();
            if bbox.width > max || bbox.height > max {
                return Err(DeriveError::InvalidParameters(format!(
                    "polygon spans {}x{} pixels, over the {max} pixel limit",
                    bbox.width, bbox.height
                )));
            }
        }
        if let Some(rotation) = self.rotation {
            if !rotation.is_finite() {
                return Err(DeriveError::InvalidParameters(
                    "rotation must be a finite number of degrees".into(),
                ));
            }
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            match value {
                Some(0) => {
                    return Err(DeriveError::InvalidParameters(format!("{name} must be > 0")))
                }
                Some(v) if v > limits.max_image_dimension => {
                    return Err(DeriveError::InvalidParameters(format!(
                        "{name} {v} exceeds the {} pixel limit",
                        limits.max_image_dimension
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Stable query string for links, e.g. `polygon=[...]&rotation=30`.
    pub fn canonical_query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(polygon) = &self.polygon {
            let points: Vec<String> = polygon
                .points()
                .iter()
                .map(|p| format!("{{x:{},y:{}}}", p.x, p.y))
                .collect();
            parts.push(format!("polygon=[{}]", points.join(",")));
        }
        if let Some(rotation) = self.rotation {
            parts.push(format!("rotation={rotation}"));
        }
        if let Some(width) = self.width {
            parts.push(format!("width={width}"));
        }
        if let Some(height) = self.height {
            parts.push(format!("height={height}"));
        }
        if self.grayscale {
            parts.push("grayscale=true".to_string());
        }
        parts.join("&")
    }
}

fn parse_rotation(value: &str) -> DeriveResult<f64> {
    let rotation: f64 = value
        .trim()
        .parse()
        .map_err(|_| DeriveError::InvalidParameters(format!("rotation: '{value}' is not a number")))?;
    if !rotation.is_finite() {
        return Err(DeriveError::InvalidParameters(
            "rotation must be a finite number of degrees".into(),
        ));
    }
    Ok(rotation)
}

fn parse_dimension(name: &str, value: &str) -> DeriveResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| DeriveError::InvalidParameters(format!("{name}: '{value}' is not a positive integer")))
}

fn parse_flag(name: &str, value: &str) -> DeriveResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DeriveError::InvalidParameters(format!(
            "{name}: '{value}' is not a boolean"
        ))),
    }
}
