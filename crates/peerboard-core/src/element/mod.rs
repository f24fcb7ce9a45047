//! Drawable elements of a shared board.

mod image;
mod path;

pub use image::{ImageElement, ImageFormat};
pub use path::PathElement;

use kurbo::Point;
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for elements.
///
/// Assigned by the peer that creates the element and never rewritten by a receiver.
pub type ElementId = Uuid;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }
}

impl Default for SerializableColor {
    fn default() -> Self {
        Self::black()
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// An element of the board document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanvasElement {
    Path(PathElement),
    Image(ImageElement),
}

impl CanvasElement {
    pub fn id(&self) -> ElementId {
        match self {
            CanvasElement::Path(p) => p.id,
            CanvasElement::Image(i) => i.id,
        }
    }

    /// Human-readable kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CanvasElement::Path(_) => "path",
            CanvasElement::Image(_) => "image",
        }
    }

    pub fn as_image(&self) -> Option<&ImageElement> {
        match self {
            CanvasElement::Image(i) => Some(i),
            CanvasElement::Path(_) => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageElement> {
        match self {
            CanvasElement::Image(i) => Some(i),
            CanvasElement::Path(_) => None,
        }
    }

    /// Whether the element refuses local edits.
    pub fn is_locked(&self) -> bool {
        matches!(self, CanvasElement::Image(i) if i.locked)
    }

    /// Merge the fields present in `patch` into this element.
    ///
    /// Fields that do not exist on this kind of element are ignored.
    /// Returns true if any field changed.
    pub fn merge(&mut self, patch: &ElementPatch) -> bool {
        let mut changed = false;
        match self {
            CanvasElement::Path(path) => {
                if let Some(points) = &patch.points {
                    changed |= path.points != *points;
                    path.points = points.clone();
                }
                if let Some(color) = patch.color {
                    changed |= path.color != color;
                    path.color = color;
                }
                if let Some(width) = patch.stroke_width {
                    changed |= path.stroke_width != width;
                    path.stroke_width = width;
                }
            }
            CanvasElement::Image(image) => {
                if let Some(position) = patch.position {
                    changed |= image.position != position;
                    image.position = position;
                }
                if let Some(width) = patch.width {
                    changed |= image.width != width;
                    image.width = width;
                }
                if let Some(height) = patch.height {
                    changed |= image.height != height;
                    image.height = height;
                }
                if let Some(locked) = patch.locked {
                    changed |= image.locked != locked;
                    image.locked = locked;
                }
            }
        }
        changed
    }
}

impl From<PathElement> for CanvasElement {
    fn from(path: PathElement) -> Self {
        CanvasElement::Path(path)
    }
}

impl From<ImageElement> for CanvasElement {
    fn from(image: ImageElement) -> Self {
        CanvasElement::Image(image)
    }
}

/// A partial element keyed by id, carried by `UPDATE_ELEMENT`.
///
/// Used for moves, resizes, restyles and lock toggles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementPatch {
    pub id: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<SerializableColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl ElementPatch {
    /// An empty patch for `id`.
    pub fn new(id: ElementId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Move an image to `position`.
    pub fn moved_to(id: ElementId, position: Point) -> Self {
        Self {
            position: Some(position),
            ..Self::new(id)
        }
    }

    /// Resize an image.
    pub fn resized(id: ElementId, width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::new(id)
        }
    }

    /// Replace the points of a path (moving or reshaping it).
    pub fn with_points(id: ElementId, points: Vec<Point>) -> Self {
        Self {
            points: Some(points),
            ..Self::new(id)
        }
    }

    /// Toggle the lock flag of an image.
    pub fn lock(id: ElementId, locked: bool) -> Self {
        Self {
            locked: Some(locked),
            ..Self::new(id)
        }
    }

    /// True when the patch changes nothing but the lock flag.
    pub fn only_touches_lock(&self) -> bool {
        self.locked.is_some()
            && self.position.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.points.is_none()
            && self.color.is_none()
            && self.stroke_width.is_none()
    }

    /// True when numeric fields are usable geometry.
    pub fn is_well_formed(&self) -> bool {
        let finite = |v: Option<f64>| v.is_none_or(|v| v.is_finite() && v >= 0.0);
        let point_ok = |p: &Point| p.x.is_finite() && p.y.is_finite();
        finite(self.width)
            && finite(self.height)
            && finite(self.stroke_width)
            && self.position.as_ref().is_none_or(point_ok)
            && self
                .points
                .as_ref()
                .is_none_or(|pts| pts.iter().all(point_ok))
    }
}
