//! Page import: rasterized document pages laid out as image elements.
//!
//! Rasterization happens outside the core. Pages are staged in a
//! [`PageImport`] and land in the document as a single batch, so inbound
//! messages handled while pages are still arriving never interleave with it.

use crate::document::DocumentCommand;
use crate::element::{CanvasElement, ElementId, ImageElement};
use crate::raster::{Raster, RasterError};
use kurbo::Point;
use thiserror::Error;

/// Left edge of every imported page.
const PAGE_X: f64 = 100.0;
/// Top of the first page.
const FIRST_PAGE_Y: f64 = 50.0;
/// Vertical space between pages.
const PAGE_GAP: f64 = 20.0;
/// Pages are shown at half their raster size.
const PAGE_SCALE: f64 = 0.5;

/// Import errors.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Import is limited to {limit} pages")]
    TooManyPages { limit: usize },
    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// One rasterized page (RGBA8, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRaster {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A batch of pages being staged.
#[derive(Debug)]
pub struct PageImport {
    limit: usize,
    next_y: f64,
    pages: Vec<CanvasElement>,
}

impl PageImport {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            next_y: FIRST_PAGE_Y,
            pages: Vec::new(),
        }
    }

    /// Stage the next page below the previous one.
    pub fn add_page(&mut self, page: PageRaster) -> Result<ElementId, ImportError> {
        if self.pages.len() >= self.limit {
            return Err(ImportError::TooManyPages { limit: self.limit });
        }
        let raster = Raster::from_rgba(page.width, page.height, page.rgba)?;
        let width = raster.width() as f64 * PAGE_SCALE;
        let height = raster.height() as f64 * PAGE_SCALE;
        let image = ImageElement::from_raster(Point::new(PAGE_X, self.next_y), raster)?
            .with_size(width, height);
        let id = image.id();
        self.next_y += height + PAGE_GAP;
        self.pages.push(image.into());
        log::debug!("Staged page {} ({}x{})", self.pages.len(), width, height);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[CanvasElement] {
        &self.pages
    }

    /// The command that commits the whole batch.
    pub fn into_command(self) -> DocumentCommand {
        DocumentCommand::AddBatch(self.pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(width: u32, height: u32) -> PageRaster {
        PageRaster {
            width,
            height,
            rgba: vec![255; (width * height * 4) as usize],
        }
    }

    #[test]
    fn test_vertical_layout() {
        let mut import = PageImport::new(20);
        import.add_page(page(200, 100)).unwrap();
        import.add_page(page(200, 60)).unwrap();

        let images: Vec<_> = import
            .pages()
            .iter()
            .filter_map(CanvasElement::as_image)
            .collect();
        assert_eq!(images[0].position, Point::new(100.0, 50.0));
        assert_eq!((images[0].width, images[0].height), (100.0, 50.0));
        // 50 + 50 (half height) + 20 gap
        assert_eq!(images[1].position, Point::new(100.0, 120.0));
        assert!(images.iter().all(|i| i.is_renderable()));
    }

    #[test]
    fn test_page_limit() {
        let mut import = PageImport::new(2);
        import.add_page(page(2, 2)).unwrap();
        import.add_page(page(2, 2)).unwrap();
        assert!(matches!(
            import.add_page(page(2, 2)),
            Err(ImportError::TooManyPages { limit: 2 })
        ));
        assert_eq!(import.len(), 2);
    }

    #[test]
    fn test_bad_buffer() {
        let mut import = PageImport::new(20);
        let bad = PageRaster {
            width: 4,
            height: 4,
            rgba: vec![0; 3],
        };
        assert!(matches!(import.add_page(bad), Err(ImportError::Raster(_))));
        assert!(import.is_empty());
    }

    #[test]
    fn test_into_command() {
        let mut import = PageImport::new(20);
        let id = import.add_page(page(2, 2)).unwrap();
        match import.into_command() {
            DocumentCommand::AddBatch(pages) => assert_eq!(pages[0].id(), id),
            other => panic!("Wrong command: {:?}", other),
        }
    }
}
