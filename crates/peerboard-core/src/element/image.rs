//! Image element for raster content (imported pages, pasted pictures).

use super::ElementId;
use crate::raster::{self, Raster, RasterError, RasterState};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Image format of an encoded raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// PNG format.
    Png,
    /// JPEG format.
    Jpeg,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Get MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }

    /// Detect format from a MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/webp" => Some(ImageFormat::WebP),
            _ => None,
        }
    }

    pub(crate) fn codec(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

/// An image placed on the board.
///
/// `src` is the self-contained data URI that travels over the wire. `raster`
/// is the live decoded handle; it is never serialized and is rebuilt on the
/// receiving side (rehydration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    pub(crate) id: ElementId,
    /// Top-left corner position.
    pub position: Point,
    /// Display width.
    pub width: f64,
    /// Display height.
    pub height: f64,
    /// Transport-safe encoding of the pixels (`data:image/...;base64,...`).
    pub src: String,
    /// Refuses local edits while set.
    #[serde(default)]
    pub locked: bool,
    #[serde(skip)]
    pub(crate) raster: RasterState,
}

impl ImageElement {
    /// Create an image from an already decoded raster.
    ///
    /// The raster is encoded as a PNG data URI for transfer; the element is
    /// renderable immediately.
    pub fn from_raster(position: Point, raster: Raster) -> Result<Self, RasterError> {
        let src = raster.to_data_uri()?;
        Ok(Self {
            id: Uuid::new_v4(),
            position,
            width: raster.width() as f64,
            height: raster.height() as f64,
            src,
            locked: false,
            raster: RasterState::Ready(raster),
        })
    }

    /// Create an image from an encoded data URI.
    ///
    /// The URI header is validated here; pixels are decoded later by the
    /// rehydrator, so the element starts out pending.
    pub fn from_data_uri(
        position: Point,
        width: f64,
        height: f64,
        src: impl Into<String>,
    ) -> Result<Self, RasterError> {
        let src = src.into();
        raster::data_uri_format(&src)?;
        Ok(Self {
            id: Uuid::new_v4(),
            position,
            width,
            height,
            src,
            locked: false,
            raster: RasterState::Pending,
        })
    }

    /// Set display dimensions.
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn raster(&self) -> &RasterState {
        &self.raster
    }

    /// Decoded pixels, once rehydration has finished.
    pub fn pixels(&self) -> Option<&Raster> {
        match &self.raster {
            RasterState::Ready(raster) => Some(raster),
            _ => None,
        }
    }

    /// Whether the element can be painted.
    pub fn is_renderable(&self) -> bool {
        matches!(self.raster, RasterState::Ready(_))
    }

    /// Format declared by the data URI.
    pub fn format(&self) -> Option<ImageFormat> {
        raster::data_uri_format(&self.src).ok()
    }

    pub(crate) fn set_raster(&mut self, raster: RasterState) {
        self.raster = raster;
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.position.x.is_finite()
            && self.position.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
            && raster::data_uri_format(&self.src).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32) -> Raster {
        Raster::from_rgba(width, height, vec![200; (width * height * 4) as usize]).unwrap()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ImageFormat::from_mime_type("IMAGE/JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime_type("image/gif"), None);
    }

    #[test]
    fn test_from_raster_is_renderable() {
        let img = ImageElement::from_raster(Point::new(10.0, 20.0), solid(4, 2)).unwrap();
        assert!(img.is_renderable());
        assert!(img.src.starts_with("data:image/png;base64,"));
        assert_eq!(img.format(), Some(ImageFormat::Png));
        assert_eq!((img.width, img.height), (4.0, 2.0));
    }

    #[test]
    fn test_from_data_uri_starts_pending() {
        let src = solid(1, 1).to_data_uri().unwrap();
        let img = ImageElement::from_data_uri(Point::ZERO, 1.0, 1.0, src).unwrap();
        assert!(!img.is_renderable());
        assert_eq!(img.raster(), &RasterState::Pending);
    }

    #[test]
    fn test_from_data_uri_rejects_urls() {
        let result = ImageElement::from_data_uri(Point::ZERO, 1.0, 1.0, "https://example.com/a.png");
        assert!(matches!(result, Err(RasterError::NotDataUri)));
    }

    #[test]
    fn test_raster_is_not_serialized() {
        let img = ImageElement::from_raster(Point::ZERO, solid(2, 2)).unwrap();
        let json = serde_json::to_string(&img).unwrap();
        assert!(!json.contains("raster"));
        let back: ImageElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raster(), &RasterState::Pending);
        assert_eq!(back.src, img.src);
    }
}
