//! Freehand stroke element.

use super::{ElementId, SerializableColor};
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default stroke width for new paths.
pub const DEFAULT_STROKE_WIDTH: f64 = 4.0;

/// A freehand stroke (series of points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    pub(crate) id: ElementId,
    /// Points in drawing order.
    pub points: Vec<Point>,
    /// Stroke color.
    pub color: SerializableColor,
    /// Stroke width.
    pub stroke_width: f64,
}

impl PathElement {
    /// Create a new empty path with default style.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            points: Vec::new(),
            color: SerializableColor::black(),
            stroke_width: DEFAULT_STROKE_WIDTH,
        }
    }

    /// Create from existing points.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Self::new()
        }
    }

    /// Set the stroke style.
    pub fn with_style(mut self, color: SerializableColor, stroke_width: f64) -> Self {
        self.color = color;
        self.stroke_width = stroke_width;
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Add a point to the stroke.
    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points shifted by `(dx, dy)`, for building a move patch.
    pub fn translated_points(&self, dx: f64, dy: f64) -> Vec<Point> {
        self.points
            .iter()
            .map(|p| Point::new(p.x + dx, p.y + dy))
            .collect()
    }

    /// Bounding box of the stroke, inflated by half the stroke width.
    pub fn bounds(&self) -> Option<Rect> {
        let first = self.points.first()?;
        let rect = self
            .points
            .iter()
            .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p));
        let half = self.stroke_width / 2.0;
        Some(rect.inflate(half, half))
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.stroke_width.is_finite()
            && self.stroke_width >= 0.0
            && self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

impl Default for PathElement {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_ids_are_unique() {
        let a = PathElement::new();
        let b = PathElement::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_bounds_include_stroke() {
        let path = PathElement::from_points(vec![Point::new(0.0, 0.0), Point::new(10.0, 20.0)])
            .with_style(SerializableColor::black(), 2.0);
        let bounds = path.bounds().unwrap();
        assert!((bounds.x0 + 1.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 21.0).abs() < f64::EPSILON);
        assert!(PathElement::new().bounds().is_none());
    }

    #[test]
    fn test_translated_points() {
        let path = PathElement::from_points(vec![Point::new(1.0, 1.0)]);
        assert_eq!(path.translated_points(2.0, -1.0), vec![Point::new(3.0, 0.0)]);
    }
}
