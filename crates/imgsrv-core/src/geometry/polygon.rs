//! Polygon parsing, bounding boxes and rectangle classification.

use serde::{Deserialize, Serialize};

use crate::error::{DeriveError, DeriveResult};

/// An integer pixel coordinate. Coordinates may be negative when a region
/// reaches past the top/left edge of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    fn to(self, other: Point) -> (f64, f64) {
        ((other.x - self.x) as f64, (other.y - self.y) as f64)
    }

    fn distance(self, other: Point) -> f64 {
        let (dx, dy) = self.to(other);
        dx.hypot(dy)
    }
}

/// Either `{x, y}` objects or `[x, y]` pairs are accepted on input.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Object { x: i64, y: i64 },
    Pair([i64; 2]),
}

impl From<RawPoint> for Point {
    fn from(raw: RawPoint) -> Self {
        match raw {
            RawPoint::Object { x, y } => Point { x, y },
            RawPoint::Pair([x, y]) => Point { x, y },
        }
    }
}

/// Axis-aligned bounding box in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

/// An ordered sequence of points. Insertion order is the winding order and
/// matters for side-length measurement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Parse a polygon from its query-string form.
    ///
    /// The input is JSON5, so strict JSON (`[{"x":1,"y":2},...]`), bare keys
    /// (`[{x:1,y:2},...]`), single quotes and trailing commas all parse.
    /// Points may also be coordinate pairs (`[[1,2],...]`).
    pub fn parse(input: &str) -> DeriveResult<Self> {
        let raw: Vec<RawPoint> = json5::from_str(input)
            .map_err(|e| DeriveError::InvalidParameters(format!("polygon: {e}")))?;
        Ok(Self::new(raw.into_iter().map(Point::from).collect()))
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bounding box of all points. An empty polygon yields a zero box.
    pub fn bounding_box(&self) -> BoundingBox {
        let Some(first) = self.points.first() else {
            return BoundingBox {
                left: 0,
                top: 0,
                width: 0,
                height: 0,
            };
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        BoundingBox {
            left: min_x,
            top: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// Points shifted so the given origin becomes (0, 0).
    pub fn translated(&self, origin_x: i64, origin_y: i64) -> Vec<Point> {
        self.points
            .iter()
            .map(|p| Point::new(p.x - origin_x, p.y - origin_y))
            .collect()
    }

    /// Whether the polygon is a (possibly rotated) rectangle.
    ///
    /// The angle at every corner is rounded to whole degrees before
    /// comparison, so hand-picked coordinates that are a pixel or two off
    /// still classify as rectangles.
    pub fn is_rectangle(&self) -> bool {
        let [p0, p1, p2, p3] = match self.points.as_slice() {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => return false,
        };

        let a = p3.to(p0);
        let b = p0.to(p1);
        let c = p1.to(p2);
        let d = p2.to(p3);

        let a1 = corner_angle(a, b);
        let a2 = corner_angle(b, c);
        let a3 = corner_angle(c, d);
        let a4 = corner_angle(d, a);

        a1 == a2 && a3 == a4 && a1 == a3
    }

    /// Side lengths of the polygon in its own frame: `(|p0 p1|, |p1 p2|)`.
    ///
    /// Only meaningful for polygons with at least three points; shorter
    /// polygons measure as zero.
    pub fn side_lengths(&self) -> (u32, u32) {
        match self.points.as_slice() {
            [p0, p1, p2, ..] => (
                round_half_up(p0.distance(*p1)) as u32,
                round_half_up(p1.distance(*p2)) as u32,
            ),
            _ => (0, 0),
        }
    }
}

/// Angle between two edge vectors in whole degrees. Degenerate (zero-length)
/// edges produce NaN, which never compares equal.
fn corner_angle(u: (f64, f64), v: (f64, f64)) -> f64 {
    let norm = u.0.hypot(u.1) * v.0.hypot(v.1);
    let cos = ((u.0 * v.0 + u.1 * v.1) / norm).clamp(-1.0, 1.0);
    cos.acos().to_degrees().round()
}

/// Round to the nearest integer with halves going up (towards +inf).
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Size of the bounding box of a `width x height` rectangle rotated
/// clockwise by `degrees` about its centre.
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let (s, c) = degrees.to_radians().sin_cos();
    let (w2, h2) = (f64::from(width) / 2.0, f64::from(height) / 2.0);
    let corners = [(-w2, h2), (w2, h2), (w2, -h2), (-w2, -h2)];

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        let rx = c * x - s * y;
        let ry = s * x + c * y;
        min_x = min_x.min(rx);
        max_x = max_x.max(rx);
        min_y = min_y.min(ry);
        max_y = max_y.max(ry);
    }

    (
        round_half_up(max_x - min_x) as u32,
        round_half_up(max_y - min_y) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(points: &[(i64, i64)]) -> Polygon {
        Polygon::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn test_parse_relaxed_notation() {
        let p = Polygon::parse("[{x:421,y:264},{x:755,y:264},{x:755,y:453},{x:421,y:453}]")
            .unwrap();
        assert_eq!(p.len(), 4);
        assert_eq!(p.points()[1], Point::new(755, 264));
    }

    #[test]
    fn test_parse_strict_json_and_pairs() {
        let json = Polygon::parse(r#"[{"x": -58, "y": -54}, {"x": 397, "y": -54}]"#).unwrap();
        assert_eq!(json.points()[0], Point::new(-58, -54));

        let pairs = Polygon::parse("[[1,2],[3,4],[5,6]]").unwrap();
        assert_eq!(pairs.points()[2], Point::new(5, 6));
    }

    #[test]
    fn test_parse_json5_forms() {
        let trailing = Polygon::parse("[{x:1,y:2},{x:3,y:4},{x:5,y:6},]").unwrap();
        assert_eq!(trailing.len(), 3);

        let quoted = Polygon::parse("[{'x':1,'y':2},{'x':3,'y':4},{'x':5,'y':6}]").unwrap();
        assert_eq!(quoted.points()[2], Point::new(5, 6));

        let signed = Polygon::parse("[{x:+1,y:-2}, /* corner */ {x:3,y:4},{x:5,y:6}]").unwrap();
        assert_eq!(signed.points()[0], Point::new(1, -2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = Polygon::parse("[{x:1,y:}]").unwrap_err();
        assert!(matches!(err, DeriveError::InvalidParameters(_)));
        assert!(Polygon::parse("[{x:1.5,y:2}]").is_err());
    }

    #[test]
    fn test_axis_aligned_rectangle() {
        let p = poly(&[(421, 264), (755, 264), (755, 453), (421, 453)]);
        assert!(p.is_rectangle());
        assert_eq!(
            p.bounding_box(),
            BoundingBox {
                left: 421,
                top: 264,
                width: 334,
                height: 189
            }
        );
    }

    #[test]
    fn test_square_rotated_thirty_degrees_is_rectangle() {
        // side 100 rotated by 30 degrees, rounded to whole pixels
        let p = poly(&[(0, 0), (87, 50), (37, 137), (-50, 87)]);
        assert!(p.is_rectangle());
    }

    #[test]
    fn test_perturbed_vertex_is_not_rectangle() {
        let p = poly(&[(0, 0), (87, 50), (45, 137), (-50, 87)]);
        assert!(!p.is_rectangle());
    }

    #[test]
    fn test_rounding_tolerates_one_pixel_noise() {
        let p = poly(&[(348, 447), (505, 599), (380, 727), (224, 576)]);
        assert!(p.is_rectangle());
    }

    #[test]
    fn test_non_quadrilaterals_are_not_rectangles() {
        assert!(!poly(&[(0, 0), (10, 0), (10, 10)]).is_rectangle());
        assert!(!poly(&[(0, 0), (10, 0), (10, 10), (0, 10), (0, 5)]).is_rectangle());
    }

    #[test]
    fn test_degenerate_quadrilateral_is_not_rectangle() {
        let p = poly(&[(0, 0), (0, 0), (10, 10), (0, 10)]);
        assert!(!p.is_rectangle());
    }

    #[test]
    fn test_side_lengths_follow_winding() {
        let p = poly(&[(348, 447), (505, 599), (380, 727), (224, 576)]);
        assert_eq!(p.side_lengths(), (219, 179));
    }

    #[test]
    fn test_rotated_bounds() {
        assert_eq!(rotated_bounds(200, 100, 0.0), (200, 100));
        assert_eq!(rotated_bounds(200, 100, 90.0), (100, 200));
        // 45 degrees: (200 + 100) * cos(45) = 212.13
        assert_eq!(rotated_bounds(200, 100, 45.0), (212, 212));
    }

    #[test]
    fn test_translated_points() {
        let p = poly(&[(10, 20), (30, 25), (15, 40)]);
        let bb = p.bounding_box();
        let local = p.translated(bb.left, bb.top);
        assert_eq!(local, vec![Point::new(0, 0), Point::new(20, 5), Point::new(5, 20)]);
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(2.5), 3.0);
        assert_eq!(round_half_up(-2.5), -2.0);
        assert_eq!(round_half_up(218.53), 219.0);
    }
}
